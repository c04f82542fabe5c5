//! Request and response types for the REST API.
//!
//! Entity records from `muster-core` serialize directly as response bodies;
//! this module only defines the request envelopes and the handful of
//! composite responses that wrap more than one record.

use chrono::{DateTime, Utc};
use muster_core::{
    AgentStatus, AlertStatus, Dispatch, DispatchPriority, LoopMessage, LoopStage, MessageKind,
    MessagePriority,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// AGENT REQUESTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStatusRequest {
    pub status: AgentStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// One-line description of what the agent is working on.
    #[serde(default)]
    pub working_context: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentListQuery {
    #[serde(default)]
    pub include_retired: bool,
}

// ============================================================================
// DISPATCH REQUESTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDispatchRequest {
    pub agent_name: String,
    pub command: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: DispatchPriority,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteDispatchRequest {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NextDispatchQuery {
    /// Restrict to one agent's queue; omit to peek across the whole fleet.
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailDispatchRequest {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptDispatchRequest {
    pub reason: String,
}

/// Outcome of a failure report: the failed record plus the retry clone,
/// if one was scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailDispatchResponse {
    pub failed: Dispatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<Dispatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetAgentResponse {
    pub cleared: usize,
}

// ============================================================================
// MESSAGE REQUESTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub from_agent: String,
    pub to_agent: String,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default)]
    pub task_ref: Option<String>,
    #[serde(default)]
    pub priority: MessagePriority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceMessageRequest {
    pub to_stage: LoopStage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakLoopRequest {
    pub by: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub from_agent: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxResponse {
    pub messages: Vec<LoopMessage>,
    pub unread: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

// ============================================================================
// EVENT REQUESTS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct EventQuery {
    pub agent: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

// ============================================================================
// ALERT REQUESTS
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertListQuery {
    #[serde(default)]
    pub status: Option<AlertStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgeAlertRequest {
    pub by: String,
}

// ============================================================================
// ACTIVITY REQUESTS
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

// =============================================================================
// TESTS
// =============================================================================
