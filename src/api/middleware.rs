//! API key authentication and per-client rate limiting.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// Security settings for the HTTP API.
///
/// Read from `DIRECTIVE_ENGINE_API_KEY`, `DIRECTIVE_ENGINE_CORS_ORIGINS`
/// (comma-separated) and `DIRECTIVE_ENGINE_RATE_LIMIT` (requests per minute).
#[derive(Clone, Debug, Default)]
pub struct SecurityConfig {
    /// Bearer token required on every route except health. `None` disables auth.
    pub api_key: Option<String>,
    /// Allowed CORS origins. `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    /// Per-client request limiter, if enabled.
    pub rate_limiter: Option<RateLimiter>,
}

impl SecurityConfig {
    /// Load security configuration from environment variables.
    pub fn from_env() -> Self {
        let api_key = std::env::var("DIRECTIVE_ENGINE_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let cors_origins = std::env::var("DIRECTIVE_ENGINE_CORS_ORIGINS")
            .ok()
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect());

        let rate_limit = std::env::var("DIRECTIVE_ENGINE_RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(100);

        // Rate limiting only applies to keyed (remote) deployments.
        let rate_limiter = api_key
            .as_ref()
            .map(|_| RateLimiter::new(rate_limit, Duration::from_secs(60)));

        Self {
            api_key,
            cors_origins,
            rate_limiter,
        }
    }

    /// No authentication, permissive CORS, no rate limit.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Require `key` as a bearer token (for testing).
    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Allow `max_requests` per client per minute, without auth.
    pub fn with_rate_limit(max_requests: u32) -> Self {
        Self {
            rate_limiter: Some(RateLimiter::new(max_requests, Duration::from_secs(60))),
            ..Self::default()
        }
    }
}

/// Sliding-window request counter keyed by client IP.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Maximum requests allowed per window
    max_requests: u32,
    /// Length of the sliding window
    window: Duration,
    buckets: Arc<Mutex<Buckets>>,
}

#[derive(Debug)]
struct Buckets {
    /// Request times per client, oldest first
    by_ip: HashMap<IpAddr, Vec<Instant>>,
    last_sweep: Instant,
}

impl Buckets {
    fn sweep(&mut self, now: Instant, window: Duration) {
        self.by_ip.retain(|_, times| {
            times.retain(|&t| now.duration_since(t) < window);
            !times.is_empty()
        });
        self.last_sweep = now;
    }
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per client within `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: Arc::new(Mutex::new(Buckets {
                by_ip: HashMap::new(),
                last_sweep: Instant::now(),
            })),
        }
    }

    /// Record a request from `ip`. Returns false once the window is full.
    ///
    /// Clients idle for a whole window are dropped at most once per window.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");

        if now.duration_since(buckets.last_sweep) >= self.window {
            buckets.sweep(now, self.window);
        }

        let entry = buckets.by_ip.entry(ip).or_default();
        entry.retain(|&t| now.duration_since(t) < self.window);

        if entry.len() < self.max_requests as usize {
            entry.push(now);
            true
        } else {
            false
        }
    }

    /// Drop every client with no request inside the current window.
    pub fn cleanup(&self) {
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        buckets.sweep(Instant::now(), self.window);
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .lock()
            .expect("rate limiter lock poisoned")
            .by_ip
            .len()
    }
}

/// Reject requests without the configured bearer token.
pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = config.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("Rejected request with invalid API key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Rejected request without bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Answer 429 once a client exceeds its window.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = client_ip(&request);

    if limiter.check(ip) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(client_ip = %ip, "Rate limit exceeded");
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

/// Client address from proxy headers, or loopback for direct local calls.
fn client_ip(request: &Request<Body>) -> IpAddr {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header("X-Forwarded-For")
        .or_else(|| header("X-Real-IP"))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
