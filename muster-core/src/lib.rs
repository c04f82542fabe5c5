//! MUSTER Core - Entity Types
//!
//! Pure data structures with no behavior beyond small state-machine helpers.
//! All other crates depend on this. This crate contains ONLY data types and
//! their transition rules - no storage, no I/O.

pub mod activity;
pub mod agent;
pub mod alert;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod identity;
pub mod message;

pub use activity::{ActivityEntry, ActivityKind};
pub use agent::{
    Agent, AgentHealth, AgentStatus, BackoffLevel, CircuitState, HeartbeatStatus,
};
pub use alert::{
    AlertChannel, AlertDelivery, AlertPreferences, AlertSeverity, AlertStatus, AlertType,
    DeliveryStatus, LoopAlert, QuietHours,
};
pub use config::{
    DispatchConfig, EventConfig, HeartbeatConfig, MusterConfig, SlaConfig,
};
pub use dispatch::{Dispatch, DispatchPriority, DispatchStatus};
pub use error::{
    AgentError, DispatchError, EntityType, ErrorKind, LoopError, MusterError, MusterResult,
    RateLimitError, StorageError, ValidationError,
};
pub use event::{AgentEvent, EventPayload, EventStatus};
pub use identity::{new_entity_id, EntityId, Timestamp};
pub use message::{LoopMessage, LoopStage, MessageKind, MessagePriority};
