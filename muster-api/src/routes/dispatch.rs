//! Dispatch REST API Routes
//!
//! Queueing work for agents and the worker-side lifecycle: claim,
//! complete, fail (with automatic retry scheduling), interrupt.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use muster_engine::NewDispatch;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;
use crate::types::{
    CompleteDispatchRequest, CreateDispatchRequest, FailDispatchRequest, FailDispatchResponse,
    InterruptDispatchRequest, NextDispatchQuery,
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /dispatches - Queue a command for an agent
pub async fn create_dispatch(
    State(state): State<AppState>,
    Json(req): Json<CreateDispatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &req.agent_name)?;
    let dispatch = state.engine.dispatches.create(
        now,
        NewDispatch {
            agent_name: req.agent_name,
            command: req.command,
            payload: req.payload,
            priority: req.priority,
            max_retries: req.max_retries,
        },
    )?;
    Ok((StatusCode::CREATED, Json(dispatch)))
}

/// GET /dispatches/next?agent= - Peek the next claimable dispatch for an agent
pub async fn next_dispatch(
    State(state): State<AppState>,
    Query(query): Query<NextDispatchQuery>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let next = match query.agent {
        Some(agent) => {
            state.guard.check(now, &agent)?;
            state.engine.dispatches.next(now, &agent)?
        }
        None => state.engine.dispatches.next_any(now)?,
    };
    Ok(Json(next))
}

/// GET /dispatches/:id - Fetch a dispatch
pub async fn get_dispatch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let dispatch = state.engine.dispatches.get(id)?.ok_or_else(|| {
        ApiError::new(ErrorCode::DispatchNotFound, format!("Dispatch not found: {}", id))
    })?;
    Ok(Json(dispatch))
}

/// POST /dispatches/:id/running - Take exclusive ownership
pub async fn claim_dispatch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let dispatch = state.engine.dispatches.claim(Utc::now(), id)?;
    Ok(Json(dispatch))
}

/// POST /dispatches/:id/completed - Finish a running dispatch
pub async fn complete_dispatch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteDispatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let dispatch = state.engine.dispatches.complete(Utc::now(), id, req.result)?;
    Ok(Json(dispatch))
}

/// POST /dispatches/:id/failed - Report a failure, scheduling a retry if any remain
pub async fn fail_dispatch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailDispatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let (failed, retry) = state.engine.dispatches.fail(Utc::now(), id, &req.error)?;
    Ok(Json(FailDispatchResponse { failed, retry }))
}

/// POST /dispatches/:id/interrupt - Cancel without spawning a retry
pub async fn interrupt_dispatch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<InterruptDispatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let dispatch = state.engine.dispatches.interrupt(Utc::now(), id, &req.reason)?;
    Ok(Json(dispatch))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_dispatch))
        .route("/next", get(next_dispatch))
        .route("/:id", get(get_dispatch))
        .route("/:id/running", post(claim_dispatch))
        .route("/:id/completed", post(complete_dispatch))
        .route("/:id/failed", post(fail_dispatch))
        .route("/:id/interrupt", post(interrupt_dispatch))
}
