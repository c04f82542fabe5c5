//! Dispatch queue types.
//!
//! A dispatch is a unit of work queued for exactly one agent. Status moves
//! strictly pending -> running -> {completed | failed}; failed dispatches may
//! spawn a retry clone linked back to the root via `original_dispatch_id`.

use crate::identity::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl DispatchStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Running => "running",
            DispatchStatus::Completed => "completed",
            DispatchStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, DispatchStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DispatchStatus::Pending),
            "running" => Ok(DispatchStatus::Running),
            "completed" => Ok(DispatchStatus::Completed),
            "failed" => Ok(DispatchStatus::Failed),
            _ => Err(DispatchStatusParseError(s.to_string())),
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: DispatchStatus) -> bool {
        matches!(
            (self, next),
            (DispatchStatus::Pending, DispatchStatus::Running)
                | (DispatchStatus::Pending, DispatchStatus::Failed)
                | (DispatchStatus::Running, DispatchStatus::Completed)
                | (DispatchStatus::Running, DispatchStatus::Failed)
        )
    }

    /// Whether this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Completed | DispatchStatus::Failed)
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DispatchStatus {
    type Err = DispatchStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid dispatch status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchStatusParseError(pub String);

impl fmt::Display for DispatchStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid dispatch status: {}", self.0)
    }
}

impl std::error::Error for DispatchStatusParseError {}

// ============================================================================
// PRIORITY
// ============================================================================

/// Priority of a dispatch. Lower numeric value wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPriority {
    /// Served ahead of all others regardless of arrival order.
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl DispatchPriority {
    /// Numeric rank as stored by the original system (0=urgent .. 3=low).
    pub fn as_i16(&self) -> i16 {
        match self {
            DispatchPriority::Urgent => 0,
            DispatchPriority::High => 1,
            DispatchPriority::Normal => 2,
            DispatchPriority::Low => 3,
        }
    }

    /// Parse from the numeric rank.
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(DispatchPriority::Urgent),
            1 => Some(DispatchPriority::High),
            2 => Some(DispatchPriority::Normal),
            3 => Some(DispatchPriority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchPriority::Urgent => "urgent",
            DispatchPriority::High => "high",
            DispatchPriority::Normal => "normal",
            DispatchPriority::Low => "low",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// DISPATCH RECORD
// ============================================================================

/// A unit of work addressed to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub dispatch_id: EntityId,
    /// Target agent name.
    pub agent_name: String,
    /// The instruction to execute.
    pub command: String,
    pub payload: Option<serde_json::Value>,
    pub status: DispatchStatus,
    pub priority: DispatchPriority,
    /// Mirrors `priority == Urgent`; kept as a stored flag so urgent work is
    /// queryable without decoding the priority rank.
    pub is_urgent: bool,
    pub retry_count: i32,
    pub max_retries: i32,
    /// Earliest time a retry clone becomes eligible for claiming.
    pub next_retry_at: Option<Timestamp>,
    /// Root dispatch when this record is a retry clone.
    pub original_dispatch_id: Option<EntityId>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Optimistic concurrency version; bumped on every committed update.
    pub version: i64,
}

impl Dispatch {
    /// Whether this pending dispatch may be claimed at `now`.
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        self.status == DispatchStatus::Pending
            && self.next_retry_at.map(|at| at <= now).unwrap_or(true)
    }

    /// Whether another retry clone may be scheduled after a failure.
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

// =============================================================================
// TESTS
// =============================================================================
