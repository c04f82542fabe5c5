//! Alert REST API Routes
//!
//! Read surface for SLA and failure alerts, plus acknowledgement.
//! Alerts are raised and resolved by the engine, never via the API.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::AppState;
use crate::types::{AcknowledgeAlertRequest, AlertListQuery};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /alerts?status= - List alerts, newest first
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertListQuery>,
) -> ApiResult<impl IntoResponse> {
    let alerts = state.engine.alerts.list(query.status)?;
    Ok(Json(alerts))
}

/// GET /alerts/:id - Fetch an alert
pub async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let alert = state.engine.alerts.get(id)?.ok_or_else(|| {
        ApiError::new(ErrorCode::AlertNotFound, format!("Alert not found: {}", id))
    })?;
    Ok(Json(alert))
}

/// POST /alerts/:id/acknowledge - Record that someone has seen the alert
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcknowledgeAlertRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    state.guard.check(now, &req.by)?;
    let alert = state.engine.alerts.acknowledge(now, id, &req.by)?;
    Ok(Json(alert))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/:id", get(get_alert))
        .route("/:id/acknowledge", post(acknowledge_alert))
}
