//! Activity feed types.
//!
//! The feed is an append-only log of things that are not directed messages:
//! channel broadcasts, heartbeat check-ins, and status changes. Entries are
//! immutable once written.

use crate::identity::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// Kind of an activity feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A broadcast to everyone, not SLA-tracked.
    Broadcast,
    /// A heartbeat check-in.
    Heartbeat,
    /// An agent availability change.
    StatusChange,
}

/// One entry in the activity feed. No version field; entries never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub activity_id: EntityId,
    pub agent_name: String,
    pub kind: ActivityKind,
    pub body: String,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_tags() {
        let json = serde_json::to_value(ActivityKind::StatusChange).unwrap();
        assert_eq!(json, "status_change");
        let json = serde_json::to_value(ActivityKind::Broadcast).unwrap();
        assert_eq!(json, "broadcast");
    }
}
