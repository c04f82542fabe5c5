//! REST API Routes Module
//!
//! Route handlers organized by entity type, assembled into one router:
//!
//! - `/agents` - registration, lifecycle, heartbeats, inbox, worker surface
//! - `/dispatches` - queueing and the running/completed/failed lifecycle
//! - `/messages` - the five-stage accountability loop and broadcasts
//! - `/events` - TTL event bus polling
//! - `/alerts` - SLA and failure alerts
//! - `/activity` - recent activity feed
//! - `/health` - liveness check

pub mod agent;
pub mod alert;
pub mod dispatch;
pub mod event;
pub mod health;
pub mod message;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full API router over the given application state.
///
/// Entity routes live under `/api/v1`; the health check stays unprefixed.
pub fn create_api_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .nest("/agents", agent::create_router())
        .nest("/dispatches", dispatch::create_router())
        .nest("/messages", message::create_router())
        .nest("/events", event::create_router())
        .nest("/alerts", alert::create_router())
        .route("/activity", get(agent::activity_feed));

    Router::new()
        .nest("/api/v1", api)
        .merge(health::create_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use muster_core::MusterConfig;
    use muster_engine::RateLimitConfig;
    use muster_test_utils::MemoryStorage;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let state = AppState::new(
            Arc::new(MemoryStorage::new()),
            &MusterConfig::default(),
            RateLimitConfig {
                enabled: false,
                ..Default::default()
            },
        );
        create_api_router(state)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_register_agent_created_then_conflict() {
        let router = test_router();

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/agents",
                serde_json::json!({"name": "sam", "role": "backend"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["name"], "sam");
        assert_eq!(json["status"], "offline");

        let response = router
            .oneshot(json_request(
                "POST",
                "/api/v1/agents",
                serde_json::json!({"name": "sam", "role": "backend"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["code"], "AGENT_ALREADY_REGISTERED");
    }

    #[tokio::test]
    async fn test_unknown_agent_is_404() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/api/v1/agents/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "AGENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_dispatch_lifecycle_over_http() {
        let router = test_router();

        router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/agents",
                serde_json::json!({"name": "sam", "role": "backend"}),
            ))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/dispatches",
                serde_json::json!({"agent_name": "sam", "command": "triage", "priority": "high"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let dispatch = body_json(response).await;
        let id = dispatch["dispatch_id"].as_str().unwrap().to_string();
        assert_eq!(dispatch["status"], "pending");

        let response = router
            .clone()
            .oneshot(
                Request::post(format!("/api/v1/dispatches/{}/running", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "running");

        // A second claim loses the race.
        let response = router
            .clone()
            .oneshot(
                Request::post(format!("/api/v1/dispatches/{}/running", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/dispatches/{}/completed", id),
                serde_json::json!({"result": {"ok": true}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "completed");
    }

    #[tokio::test]
    async fn test_message_loop_over_http() {
        let router = test_router();

        for name in ["sam", "leo"] {
            router
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/api/v1/agents",
                    serde_json::json!({"name": name, "role": "backend"}),
                ))
                .await
                .unwrap();
        }

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/messages",
                serde_json::json!({
                    "from_agent": "sam",
                    "to_agent": "leo",
                    "kind": "request",
                    "content": "review the patch"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let message = body_json(response).await;
        let id = message["message_id"].as_str().unwrap().to_string();
        assert_eq!(message["stage"], "pending");

        let response = router
            .clone()
            .oneshot(Request::get("/api/v1/agents/leo/inbox").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let inbox = body_json(response).await;
        assert_eq!(inbox["unread"], 1);
        assert_eq!(inbox["messages"][0]["stage"], "delivered");

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/messages/{}/advance", id),
                serde_json::json!({"to_stage": "seen"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let advanced = body_json(response).await;
        assert_eq!(advanced["stage"], "seen");
        assert!(advanced["expected_reply_by"].is_string());

        // Leo's mention event is waiting on the bus.
        let response = router
            .oneshot(Request::get("/api/v1/events?agent=leo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let events = body_json(response).await;
        assert_eq!(events.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_breach_is_429() {
        let state = AppState::new(
            Arc::new(MemoryStorage::new()),
            &MusterConfig::default(),
            RateLimitConfig {
                enabled: true,
                requests_per_minute: 60,
                burst: 1,
            },
        );
        let router = create_api_router(state);

        router
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/agents",
                serde_json::json!({"name": "sam", "role": "backend"}),
            ))
            .await
            .unwrap();

        let beat = || {
            json_request(
                "POST",
                "/api/v1/agents/sam/heartbeat",
                serde_json::json!({}),
            )
        };
        let response = router.clone().oneshot(beat()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.oneshot(beat()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let json = body_json(response).await;
        assert_eq!(json["code"], "TOO_MANY_REQUESTS");
        assert!(json["details"]["retry_after_secs"].as_u64().unwrap() >= 1);
    }
}
