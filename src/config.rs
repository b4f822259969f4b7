use std::time::Duration;

/// Engine settings read from the environment.
///
/// - `DIRECTIVE_ENGINE_QUICK_FIX_PREFIX`: key prefix that forces the quick-fix profile (default `QF-`)
/// - `DIRECTIVE_ENGINE_FALLBACK_TYPE`: profile used for unregistered types (default `feature`)
/// - `DIRECTIVE_ENGINE_VERIFIER_TIMEOUT_MS`: sub-agent verifier deadline (default 5000)
/// - `DIRECTIVE_ENGINE_VERIFIER_MAX_IN_FLIGHT`: verifier calls allowed to run at once (default 8)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub quick_fix_prefix: String,
    pub fallback_type: String,
    pub verifier_timeout: Duration,
    pub verifier_max_in_flight: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quick_fix_prefix: "QF-".to_string(),
            fallback_type: "feature".to_string(),
            verifier_timeout: Duration::from_millis(5000),
            verifier_max_in_flight: 8,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let quick_fix_prefix = std::env::var("DIRECTIVE_ENGINE_QUICK_FIX_PREFIX")
            .unwrap_or(defaults.quick_fix_prefix);

        let fallback_type = std::env::var("DIRECTIVE_ENGINE_FALLBACK_TYPE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.fallback_type);

        let verifier_timeout = std::env::var("DIRECTIVE_ENGINE_VERIFIER_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.verifier_timeout);

        let verifier_max_in_flight = std::env::var("DIRECTIVE_ENGINE_VERIFIER_MAX_IN_FLIGHT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.verifier_max_in_flight);

        Self {
            quick_fix_prefix,
            fallback_type,
            verifier_timeout,
            verifier_max_in_flight,
        }
    }
}
