//! Event bus types.
//!
//! Events are short-lived (5-minute TTL), at-least-once notifications used so
//! agents learn about dispatches, handoffs, and approvals without polling the
//! whole world. An expired event is never delivered; subscribers must treat a
//! gap as "nothing happened", not as guaranteed history.

use crate::dispatch::DispatchPriority;
use crate::identity::{EntityId, Timestamp};
use crate::message::{MessageKind, MessagePriority};
use serde::{Deserialize, Serialize};

// ============================================================================
// PAYLOAD
// ============================================================================

/// Typed event payloads, one variant per event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TaskAssigned {
        task_id: String,
        from_agent: Option<String>,
        priority: MessagePriority,
    },
    TaskCompleted {
        task_id: String,
        from_agent: Option<String>,
    },
    Handoff {
        from_agent: String,
        task_ref: Option<String>,
        message: String,
    },
    Mention {
        from_agent: String,
        message_id: EntityId,
        kind: MessageKind,
        preview: String,
    },
    ApprovalNeeded {
        from_agent: String,
        task_ref: Option<String>,
        message: String,
    },
    SystemAlert {
        message: String,
    },
    Dispatch {
        dispatch_id: EntityId,
        command: String,
        priority: DispatchPriority,
    },
}

impl EventPayload {
    /// Event type tag for logging and filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::TaskAssigned { .. } => "task_assigned",
            EventPayload::TaskCompleted { .. } => "task_completed",
            EventPayload::Handoff { .. } => "handoff",
            EventPayload::Mention { .. } => "mention",
            EventPayload::ApprovalNeeded { .. } => "approval_needed",
            EventPayload::SystemAlert { .. } => "system_alert",
            EventPayload::Dispatch { .. } => "dispatch",
        }
    }
}

// ============================================================================
// EVENT RECORD
// ============================================================================

/// Delivery status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Pending,
    Delivered,
    Expired,
}

/// A published notification addressed to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub event_id: EntityId,
    pub target_agent: String,
    pub payload: EventPayload,
    pub status: EventStatus,
    pub created_at: Timestamp,
    /// Creation time plus the configured TTL; never delivered past this.
    pub expires_at: Timestamp,
    /// Optimistic concurrency version; bumped on every committed update.
    pub version: i64,
}

impl AgentEvent {
    /// Whether the event is still eligible for delivery at `now`.
    pub fn is_deliverable(&self, now: Timestamp) -> bool {
        self.status == EventStatus::Pending && now < self.expires_at
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn sample_event(status: EventStatus, expires_at: Timestamp) -> AgentEvent {
        AgentEvent {
            event_id: Uuid::now_v7(),
            target_agent: "sam".to_string(),
            payload: EventPayload::SystemAlert {
                message: "deploy finished".to_string(),
            },
            status,
            created_at: Utc::now(),
            expires_at,
            version: 1,
        }
    }

    #[test]
    fn test_payload_serde_tagged() {
        let payload = EventPayload::Dispatch {
            dispatch_id: Uuid::now_v7(),
            command: "review-pr".to_string(),
            priority: DispatchPriority::Urgent,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "dispatch");
        let back: EventPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_event_type_tags() {
        let payload = EventPayload::SystemAlert {
            message: "x".to_string(),
        };
        assert_eq!(payload.event_type(), "system_alert");
        let payload = EventPayload::TaskAssigned {
            task_id: "T-1".to_string(),
            from_agent: None,
            priority: MessagePriority::Normal,
        };
        assert_eq!(payload.event_type(), "task_assigned");
    }

    #[test]
    fn test_deliverability_respects_expiry_and_status() {
        let now = Utc::now();
        let live = sample_event(EventStatus::Pending, now + Duration::minutes(5));
        assert!(live.is_deliverable(now));

        let expired = sample_event(EventStatus::Pending, now - Duration::seconds(1));
        assert!(!expired.is_deliverable(now));

        let delivered = sample_event(EventStatus::Delivered, now + Duration::minutes(5));
        assert!(!delivered.is_deliverable(now));
    }
}
