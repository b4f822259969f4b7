use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use super::AppState;
use crate::engine::{EngineError, ProgressEngine};
use crate::models::*;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response. The full error
/// stays in the server log.
fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal", "Internal server error")),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("not_found", format!("{} not found", what))),
    )
}

fn engine_error(e: EngineError) -> ApiError {
    let message = e.to_string();
    match e {
        EngineError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", message)),
        ),
        EngineError::InvalidProfile(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalid_profile", message)),
        ),
        EngineError::ProfileInUse(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("profile_in_use", message)),
        ),
        EngineError::InvalidTransition(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalid_transition", message)),
        ),
        EngineError::ChainViolation(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("chain_violation", message)),
        ),
        EngineError::DependencyNotSatisfied {
            predecessor_id,
            predecessor_status,
            ..
        } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                predecessor_id: Some(predecessor_id),
                predecessor_status: Some(predecessor_status),
                ..ErrorResponse::new("dependency_not_satisfied", message)
            }),
        ),
        EngineError::Conflict(_) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("conflict", message)),
        ),
        EngineError::IncompleteGate {
            missing_phases,
            incomplete_children,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                missing_phases: Some(missing_phases),
                incomplete_children: Some(incomplete_children),
                ..ErrorResponse::new("incomplete_gate", message)
            }),
        ),
        EngineError::Storage(e) => internal_error(e),
    }
}

/// Run an engine call off the async runtime. Evaluation may wait on the
/// sub-agent verifier, which blocks for up to its timeout.
async fn with_engine<T, F>(engine: &ProgressEngine, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&ProgressEngine) -> Result<T, EngineError> + Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(internal_error)?
        .map_err(engine_error)
}

/// 404 unless the directive exists. Signal writes check this first.
async fn require_directive(state: &AppState, id: Uuid) -> ApiResult<Directive> {
    with_engine(&state.engine, move |engine| engine.get_directive(id)).await
}

/// Re-derive cached progress after a collaborator record changed.
async fn refresh(state: &AppState, directive_id: Uuid) -> ApiResult<()> {
    with_engine(&state.engine, move |engine| engine.refresh(directive_id))
        .await
        .map(|_| ())
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Profiles
// ============================================================

pub async fn list_profiles(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ValidationProfile>>> {
    state
        .engine
        .profiles()
        .list()
        .map(Json)
        .map_err(engine_error)
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(sd_type): Path<String>,
) -> ApiResult<Json<ValidationProfile>> {
    state
        .engine
        .profiles()
        .get(&sd_type)
        .map_err(engine_error)?
        .map(Json)
        .ok_or_else(|| not_found("Profile"))
}

pub async fn register_profile(
    State(state): State<AppState>,
    Json(input): Json<CreateProfileInput>,
) -> ApiResult<(StatusCode, Json<ValidationProfile>)> {
    state
        .engine
        .register_profile(input)
        .map(|p| (StatusCode::CREATED, Json(p)))
        .map_err(engine_error)
}

// ============================================================
// Directives
// ============================================================

pub async fn list_directives(State(state): State<AppState>) -> ApiResult<Json<Vec<Directive>>> {
    state.db.list_directives().map(Json).map_err(internal_error)
}

pub async fn get_directive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Directive>> {
    state
        .db
        .get_directive(id)
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found("Directive"))
}

pub async fn create_directive(
    State(state): State<AppState>,
    Json(input): Json<CreateDirectiveInput>,
) -> ApiResult<(StatusCode, Json<Directive>)> {
    with_engine(&state.engine, move |engine| engine.create_directive(input))
        .await
        .map(|d| (StatusCode::CREATED, Json(d)))
}

pub async fn list_children(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Directive>>> {
    with_engine(&state.engine, move |engine| engine.children(id))
        .await
        .map(Json)
}

pub async fn create_children(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateChildrenInput>,
) -> ApiResult<(StatusCode, Json<Vec<Directive>>)> {
    with_engine(&state.engine, move |engine| engine.create_children(id, input))
        .await
        .map(|c| (StatusCode::CREATED, Json(c)))
}

// ============================================================
// Evaluation and lifecycle
// ============================================================

pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProgressReport>> {
    with_engine(&state.engine, move |engine| engine.progress(id))
        .await
        .map(Json)
}

pub async fn get_breakdown(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PhaseBreakdown>> {
    with_engine(&state.engine, move |engine| engine.breakdown(id))
        .await
        .map(Json)
}

pub async fn check_completion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CompletionCheck>> {
    with_engine(&state.engine, move |engine| engine.check_completion(id))
        .await
        .map(Json)
}

pub async fn transition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<TransitionInput>,
) -> ApiResult<Json<Directive>> {
    with_engine(&state.engine, move |engine| {
        engine.transition(id, input.target_status)
    })
    .await
    .map(Json)
}

pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Directive>> {
    with_engine(&state.engine, move |engine| engine.mark_complete(id))
        .await
        .map(Json)
}

// ============================================================
// Collaborator signals
// ============================================================

pub async fn create_requirements_doc(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateRequirementsDocInput>,
) -> ApiResult<(StatusCode, Json<RequirementsDoc>)> {
    require_directive(&state, id).await?;
    let doc = state
        .db
        .create_requirements_doc(id, input)
        .map_err(internal_error)?;
    refresh(&state, id).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

pub async fn list_deliverables(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Deliverable>>> {
    state.db.list_deliverables(id).map(Json).map_err(internal_error)
}

pub async fn create_deliverable(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateDeliverableInput>,
) -> ApiResult<(StatusCode, Json<Deliverable>)> {
    require_directive(&state, id).await?;
    let deliverable = state
        .db
        .create_deliverable(id, input)
        .map_err(internal_error)?;
    refresh(&state, id).await?;
    Ok((StatusCode::CREATED, Json(deliverable)))
}

pub async fn update_deliverable(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateDeliverableInput>,
) -> ApiResult<Json<Deliverable>> {
    let deliverable = state
        .db
        .update_deliverable(id, input)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Deliverable"))?;
    refresh(&state, deliverable.directive_id).await?;
    Ok(Json(deliverable))
}

pub async fn list_user_stories(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<UserStory>>> {
    state.db.list_user_stories(id).map(Json).map_err(internal_error)
}

pub async fn create_user_story(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateUserStoryInput>,
) -> ApiResult<(StatusCode, Json<UserStory>)> {
    require_directive(&state, id).await?;
    let story = state
        .db
        .create_user_story(id, input)
        .map_err(internal_error)?;
    refresh(&state, id).await?;
    Ok((StatusCode::CREATED, Json(story)))
}

pub async fn update_user_story(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateUserStoryInput>,
) -> ApiResult<Json<UserStory>> {
    let story = state
        .db
        .update_user_story(id, input)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("User story"))?;
    refresh(&state, story.directive_id).await?;
    Ok(Json(story))
}

pub async fn list_handoffs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Handoff>>> {
    state.db.list_handoffs(id).map(Json).map_err(internal_error)
}

pub async fn create_handoff(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateHandoffInput>,
) -> ApiResult<(StatusCode, Json<Handoff>)> {
    require_directive(&state, id).await?;
    let handoff = state
        .db
        .create_handoff(id, input)
        .map_err(internal_error)?;
    refresh(&state, id).await?;
    Ok((StatusCode::CREATED, Json(handoff)))
}

pub async fn accept_handoff(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let directive_id = state
        .db
        .accept_handoff(id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Handoff"))?;
    refresh(&state, directive_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_retrospective(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Retrospective>)> {
    require_directive(&state, id).await?;
    let retrospective = state.db.record_retrospective(id).map_err(internal_error)?;
    refresh(&state, id).await?;
    Ok((StatusCode::CREATED, Json(retrospective)))
}

pub async fn list_verdicts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<SubAgentVerdict>>> {
    state.db.latest_verdicts(id).map(Json).map_err(internal_error)
}

pub async fn record_verdict(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateVerdictInput>,
) -> ApiResult<(StatusCode, Json<SubAgentVerdict>)> {
    require_directive(&state, id).await?;
    let verdict = state.db.record_verdict(id, input).map_err(internal_error)?;
    refresh(&state, id).await?;
    Ok((StatusCode::CREATED, Json(verdict)))
}
