//! Shared application state for Axum routers.

use std::sync::Arc;

use muster_core::MusterConfig;
use muster_engine::{Engine, RateLimitConfig, RateLimitGuard};
use muster_storage::StorageTrait;

/// Application-wide state shared across all routes.
///
/// Every field is a cheap handle; cloning the state per request is the
/// intended usage.
#[derive(Clone)]
pub struct AppState {
    /// All coordination components wired over one store.
    pub engine: Engine,

    /// Per-agent request budgets.
    pub guard: RateLimitGuard,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        config: &MusterConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        let engine = Engine::new(storage, config);
        let guard = RateLimitGuard::new(rate_limit, engine.alerts.clone());
        Self {
            engine,
            guard,
            start_time: std::time::Instant::now(),
        }
    }
}
