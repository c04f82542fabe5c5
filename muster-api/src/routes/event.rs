//! Event REST API Routes
//!
//! Polling surface for the TTL event bus: agents poll their backlog and
//! acknowledge what they have processed.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::EventQuery;

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /events?agent=&since= - Poll an agent's undelivered backlog
pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &query.agent)?;
    let events = state.engine.events.subscribe(now, &query.agent, query.since)?;
    Ok(Json(events))
}

/// POST /events/:id/ack - Mark an event delivered
pub async fn acknowledge_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let event = state.engine.events.acknowledge(Utc::now(), id)?;
    Ok(Json(event))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(subscribe))
        .route("/:id/ack", post(acknowledge_event))
}
