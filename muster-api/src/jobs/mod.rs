//! Background jobs for the API server.

pub mod sweeper;

pub use sweeper::{sweeper_task, SweeperConfig, SweeperMetrics, SweeperSnapshot};
