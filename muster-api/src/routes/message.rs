//! Message REST API Routes
//!
//! Directed messages through the five-stage accountability loop, plus
//! untracked broadcasts into the activity feed.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use muster_engine::NewMessage;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;
use crate::types::{
    AdvanceMessageRequest, BreakLoopRequest, BroadcastRequest, SendMessageRequest,
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /messages - Send a directed message
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &req.from_agent)?;
    let message = state.engine.messages.send(
        now,
        NewMessage {
            from_agent: req.from_agent,
            to_agent: req.to_agent,
            kind: req.kind,
            content: req.content,
            task_ref: req.task_ref,
            priority: req.priority,
        },
    )?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages/:id - Fetch a message with its loop state
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let message = state.engine.messages.get(id)?.ok_or_else(|| {
        ApiError::new(ErrorCode::MessageNotFound, format!("Message not found: {}", id))
    })?;
    Ok(Json(message))
}

/// POST /messages/:id/advance - Move the loop forward
pub async fn advance_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdvanceMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.engine.messages.advance(Utc::now(), id, req.to_stage)?;
    Ok(Json(message))
}

/// POST /messages/:id/break - Break the loop, stopping SLA tracking
pub async fn break_message_loop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<BreakLoopRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &req.by)?;
    let message = state.engine.messages.break_loop(now, id, &req.by, &req.reason)?;
    Ok(Json(message))
}

/// POST /messages/broadcast - Post an untracked note to the activity feed
pub async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<BroadcastRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &req.from_agent)?;
    let entry = state.engine.messages.broadcast(now, &req.from_agent, &req.content)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(send_message))
        .route("/broadcast", post(broadcast))
        .route("/:id", get(get_message))
        .route("/:id/advance", post(advance_message))
        .route("/:id/break", post(break_message_loop))
}
