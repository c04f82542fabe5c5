//! Agent REST API Routes
//!
//! Registration and lifecycle, heartbeat check-ins, the per-agent inbox,
//! and the dispatch worker surface (next/reset). Agent-authored requests
//! are charged against that agent's rate budget.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;
use crate::types::{
    ActivityQuery, AgentListQuery, HeartbeatRequest, InboxResponse, MarkReadResponse,
    RegisterAgentRequest, ResetAgentResponse, SetStatusRequest,
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /agents - Register a new agent
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResult<impl IntoResponse> {
    let agent = state.engine.registry.register(Utc::now(), &req.name, &req.role)?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /agents - List agents
pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<AgentListQuery>,
) -> ApiResult<impl IntoResponse> {
    let agents = state.engine.registry.list(query.include_retired)?;
    Ok(Json(agents))
}

/// GET /agents/:name - Fetch a live agent
pub async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let agent = state
        .engine
        .registry
        .get(&name)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::AgentNotFound,
                format!("Agent not registered: {}", name),
            )
        })?;
    Ok(Json(agent))
}

/// POST /agents/:name/status - Change availability
pub async fn set_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &name)?;
    let agent = state
        .engine
        .registry
        .set_status(now, &name, req.status, req.reason)?;
    Ok(Json(agent))
}

/// POST /agents/:name/retire - Soft-delete an agent
pub async fn retire_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let agent = state.engine.registry.retire(Utc::now(), &name)?;
    Ok(Json(agent))
}

/// POST /agents/:name/heartbeat - Check in
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &name)?;
    let outcome = state
        .engine
        .heartbeats
        .beat(now, &name, req.working_context)?;
    Ok(Json(outcome))
}

/// GET /agents/:name/inbox - Unseen messages, flipped to delivered
pub async fn inbox(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &name)?;
    let messages = state.engine.messages.deliver_inbox(now, &name)?;
    let unread = messages.len();
    Ok(Json(InboxResponse { messages, unread }))
}

/// POST /agents/:name/messages/read-all - Advance all unseen messages to seen
pub async fn mark_all_read(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &name)?;
    let marked = state.engine.messages.mark_all_read(now, &name)?;
    Ok(Json(MarkReadResponse { marked }))
}

/// GET /agents/:name/dispatches - Dispatch history for an agent
pub async fn list_dispatches(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let dispatches = state.engine.dispatches.list_for_agent(&name)?;
    Ok(Json(dispatches))
}

/// POST /agents/:name/dispatches/reset - Force-fail every live dispatch
pub async fn reset_dispatches(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let cleared = state.engine.dispatches.reset_agent(Utc::now(), &name)?;
    Ok(Json(ResetAgentResponse { cleared }))
}

/// GET /activity - Recent activity feed
pub async fn activity_feed(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<impl IntoResponse> {
    let entries = state
        .engine
        .registry
        .activity(query.agent.as_deref(), query.limit.unwrap_or(50))?;
    Ok(Json(entries))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(register_agent).get(list_agents))
        .route("/:name", get(get_agent))
        .route("/:name/status", post(set_status))
        .route("/:name/retire", post(retire_agent))
        .route("/:name/heartbeat", post(heartbeat))
        .route("/:name/inbox", get(inbox))
        .route("/:name/messages/read-all", post(mark_all_read))
        .route("/:name/dispatches", get(list_dispatches))
        .route("/:name/dispatches/reset", post(reset_dispatches))
}
