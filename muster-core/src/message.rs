//! Message loop types.
//!
//! "The Loop" is the five-stage delivery/acknowledgement lifecycle tracked
//! per directed message: pending -> delivered -> seen -> replied -> acted ->
//! reported. Each recipient-driven stage sets a timestamp and computes the
//! deadline for the next one; a missed deadline raises a LoopAlert.

use crate::identity::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// KIND AND PRIORITY
// ============================================================================

/// Type of a directed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Passing ownership of a task to another agent.
    Handoff,
    /// Progress update.
    Update,
    /// A question or request for work.
    Request,
    /// For-your-information, no action expected.
    Fyi,
}

impl MessageKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MessageKind::Handoff => "handoff",
            MessageKind::Update => "update",
            MessageKind::Request => "request",
            MessageKind::Fyi => "fyi",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, MessageKindParseError> {
        match s.to_lowercase().as_str() {
            "handoff" => Ok(MessageKind::Handoff),
            "update" => Ok(MessageKind::Update),
            "request" => Ok(MessageKind::Request),
            "fyi" => Ok(MessageKind::Fyi),
            _ => Err(MessageKindParseError(s.to_string())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MessageKind {
    type Err = MessageKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid message kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKindParseError(pub String);

impl fmt::Display for MessageKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid message kind: {}", self.0)
    }
}

impl std::error::Error for MessageKindParseError {}

/// Priority level for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

// ============================================================================
// LOOP STAGE
// ============================================================================

/// Stage of the message loop. Derive order matches the numeric status codes
/// (0=pending .. 5=reported), so `Ord` gives "further along".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LoopStage {
    #[default]
    Pending,
    Delivered,
    Seen,
    Replied,
    Acted,
    Reported,
}

impl LoopStage {
    /// Numeric status code as stored by the original system.
    pub fn code(&self) -> i16 {
        match self {
            LoopStage::Pending => 0,
            LoopStage::Delivered => 1,
            LoopStage::Seen => 2,
            LoopStage::Replied => 3,
            LoopStage::Acted => 4,
            LoopStage::Reported => 5,
        }
    }

    /// Parse from the numeric status code.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(LoopStage::Pending),
            1 => Some(LoopStage::Delivered),
            2 => Some(LoopStage::Seen),
            3 => Some(LoopStage::Replied),
            4 => Some(LoopStage::Acted),
            5 => Some(LoopStage::Reported),
            _ => None,
        }
    }

    /// Terminal "closed loop" stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopStage::Reported)
    }
}

impl fmt::Display for LoopStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopStage::Pending => "pending",
            LoopStage::Delivered => "delivered",
            LoopStage::Seen => "seen",
            LoopStage::Replied => "replied",
            LoopStage::Acted => "acted",
            LoopStage::Reported => "reported",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// MESSAGE RECORD
// ============================================================================

/// A directed message tracked through the loop.
///
/// Channel broadcasts are not messages; they land in the activity feed and
/// are never SLA-tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopMessage {
    pub message_id: EntityId,
    pub from_agent: String,
    /// Recipient agent or human name.
    pub to_agent: String,
    pub kind: MessageKind,
    pub content: String,
    /// External task/ticket reference, if any.
    pub task_ref: Option<String>,
    pub priority: MessagePriority,
    pub stage: LoopStage,
    pub delivered_at: Option<Timestamp>,
    pub seen_at: Option<Timestamp>,
    pub replied_at: Option<Timestamp>,
    pub acted_at: Option<Timestamp>,
    pub reported_at: Option<Timestamp>,
    pub expected_reply_by: Option<Timestamp>,
    pub expected_action_by: Option<Timestamp>,
    pub expected_report_by: Option<Timestamp>,
    pub loop_broken: bool,
    pub loop_broken_reason: Option<String>,
    pub created_at: Timestamp,
    /// Optimistic concurrency version; bumped on every committed update.
    pub version: i64,
}

impl LoopMessage {
    /// Whether the SLA sweep should still inspect this message.
    pub fn is_sla_tracked(&self) -> bool {
        !self.loop_broken && !self.stage.is_terminal()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            MessageKind::Handoff,
            MessageKind::Update,
            MessageKind::Request,
            MessageKind::Fyi,
        ] {
            assert_eq!(MessageKind::from_db_str(kind.as_db_str()).unwrap(), kind);
        }
        assert!(MessageKind::from_db_str("shout").is_err());
    }

    #[test]
    fn test_stage_codes_match_order() {
        for code in 0..=5 {
            let stage = LoopStage::from_code(code).unwrap();
            assert_eq!(stage.code(), code);
        }
        assert_eq!(LoopStage::from_code(6), None);
    }

    #[test]
    fn test_stage_ordering_is_monotonic() {
        assert!(LoopStage::Pending < LoopStage::Delivered);
        assert!(LoopStage::Delivered < LoopStage::Seen);
        assert!(LoopStage::Seen < LoopStage::Replied);
        assert!(LoopStage::Replied < LoopStage::Acted);
        assert!(LoopStage::Acted < LoopStage::Reported);
        assert!(LoopStage::Reported.is_terminal());
    }
}
