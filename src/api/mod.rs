mod handlers;
mod middleware;

pub use middleware::{RateLimiter, SecurityConfig};

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::EngineConfig;
use crate::db::Database;
use crate::engine::ProgressEngine;

/// Shared handler state: raw storage for record CRUD, the engine for
/// everything that evaluates or mutates lifecycle state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: ProgressEngine,
}

impl AppState {
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        let engine = ProgressEngine::new(db.clone(), config);
        Self { db, engine }
    }
}

/// Router with security settings taken from the environment.
pub fn create_router(db: Database) -> Router {
    create_router_with_config(db, SecurityConfig::from_env())
}

pub fn create_router_with_config(db: Database, security: SecurityConfig) -> Router {
    create_router_with_state(AppState::new(db, &EngineConfig::from_env()), security)
}

pub fn create_router_with_state(state: AppState, security: SecurityConfig) -> Router {
    let mut protected = Router::new()
        // Profiles
        .route("/profiles", get(handlers::list_profiles))
        .route("/profiles", post(handlers::register_profile))
        .route("/profiles/{sd_type}", get(handlers::get_profile))
        // Directives
        .route("/directives", get(handlers::list_directives))
        .route("/directives", post(handlers::create_directive))
        .route("/directives/{id}", get(handlers::get_directive))
        .route("/directives/{id}/children", get(handlers::list_children))
        .route("/directives/{id}/children", post(handlers::create_children))
        // Evaluation and lifecycle
        .route("/progress/{id}", get(handlers::get_progress))
        .route("/breakdown/{id}", get(handlers::get_breakdown))
        .route("/completion/{id}", get(handlers::check_completion))
        .route("/transition/{id}", post(handlers::transition))
        .route("/complete/{id}", post(handlers::complete))
        // Collaborator signals
        .route("/directives/{id}/prd", post(handlers::create_requirements_doc))
        .route("/directives/{id}/deliverables", get(handlers::list_deliverables))
        .route("/directives/{id}/deliverables", post(handlers::create_deliverable))
        .route("/deliverables/{id}", put(handlers::update_deliverable))
        .route("/directives/{id}/stories", get(handlers::list_user_stories))
        .route("/directives/{id}/stories", post(handlers::create_user_story))
        .route("/stories/{id}", put(handlers::update_user_story))
        .route("/directives/{id}/handoffs", get(handlers::list_handoffs))
        .route("/directives/{id}/handoffs", post(handlers::create_handoff))
        .route("/handoffs/{id}/accept", post(handlers::accept_handoff))
        .route("/directives/{id}/retrospective", post(handlers::record_retrospective))
        .route("/directives/{id}/verdicts", get(handlers::list_verdicts))
        .route("/directives/{id}/verdicts", post(handlers::record_verdict))
        .route_layer(from_fn_with_state(
            security.clone(),
            middleware::auth_middleware,
        ));

    if let Some(limiter) = security.rate_limiter.clone() {
        protected =
            protected.route_layer(from_fn_with_state(limiter, middleware::rate_limit_middleware));
    }

    let api = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected);

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&security)),
        )
        .with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    match &security.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}
