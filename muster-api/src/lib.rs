//! MUSTER API - HTTP Server
//!
//! REST surface over the MUSTER engine: agent registration and heartbeats,
//! dispatch queueing, the message accountability loop, event polling, and
//! alerts, plus the background sweeper that drives time-based behavior.

pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;
pub mod types;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
