//! MUSTER Test Utilities
//!
//! Centralized test infrastructure for the MUSTER workspace:
//! - Fixture builders for every entity type
//! - Proptest generators for enums used across crates
//! - Re-exports so tests only need one dev-dependency

pub use muster_storage::MemoryStorage;

pub use muster_core::{
    ActivityEntry, ActivityKind, Agent, AgentEvent, AgentHealth, AgentStatus, AlertChannel,
    AlertDelivery, AlertPreferences, AlertSeverity, AlertStatus, AlertType, BackoffLevel,
    CircuitState, DeliveryStatus, Dispatch, DispatchPriority, DispatchStatus, EventPayload,
    EventStatus, LoopAlert, LoopMessage, LoopStage, MessageKind, MessagePriority, MusterConfig,
    Timestamp,
};

use chrono::{Duration, Utc};
use muster_storage::StorageTrait;
use proptest::prelude::*;
use uuid::Uuid;

// ============================================================================
// FIXTURES
// ============================================================================

/// A healthy online agent with the given name.
pub fn make_test_agent(name: &str) -> Agent {
    let now = Utc::now();
    Agent {
        agent_id: Uuid::now_v7(),
        name: name.to_string(),
        role: "backend".to_string(),
        status: AgentStatus::Online,
        status_reason: None,
        status_since: now,
        last_heartbeat: Some(now),
        last_seen: Some(now),
        circuit: CircuitState::Closed,
        health: AgentHealth::default(),
        working_context: None,
        heartbeat_slot: 0,
        retired: false,
        created_at: now,
        updated_at: now,
        version: 1,
    }
}

/// A pending normal-priority dispatch for the given agent.
pub fn make_test_dispatch(agent: &str) -> Dispatch {
    Dispatch {
        dispatch_id: Uuid::now_v7(),
        agent_name: agent.to_string(),
        command: "triage-inbox".to_string(),
        payload: None,
        status: DispatchStatus::Pending,
        priority: DispatchPriority::Normal,
        is_urgent: false,
        retry_count: 0,
        max_retries: 3,
        next_retry_at: None,
        original_dispatch_id: None,
        result: None,
        error: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        version: 1,
    }
}

/// An unsent request message between two agents.
pub fn make_test_message(from: &str, to: &str) -> LoopMessage {
    LoopMessage {
        message_id: Uuid::now_v7(),
        from_agent: from.to_string(),
        to_agent: to.to_string(),
        kind: MessageKind::Request,
        content: "please review the deploy plan".to_string(),
        task_ref: None,
        priority: MessagePriority::Normal,
        stage: LoopStage::Pending,
        delivered_at: None,
        seen_at: None,
        replied_at: None,
        acted_at: None,
        reported_at: None,
        expected_reply_by: None,
        expected_action_by: None,
        expected_report_by: None,
        loop_broken: false,
        loop_broken_reason: None,
        created_at: Utc::now(),
        version: 1,
    }
}

/// An active warning alert against an agent.
pub fn make_test_alert(agent: &str, alert_type: AlertType) -> LoopAlert {
    LoopAlert {
        alert_id: Uuid::now_v7(),
        message_id: None,
        agent_name: agent.to_string(),
        alert_type,
        severity: AlertSeverity::Warning,
        status: AlertStatus::Active,
        reason: "deadline missed".to_string(),
        escalated_to: None,
        acknowledged: false,
        acknowledged_by: None,
        acknowledged_at: None,
        created_at: Utc::now(),
        resolved_at: None,
        version: 1,
    }
}

/// A pending event with a five-minute TTL.
pub fn make_test_event(target: &str) -> AgentEvent {
    let now = Utc::now();
    AgentEvent {
        event_id: Uuid::now_v7(),
        target_agent: target.to_string(),
        payload: EventPayload::SystemAlert {
            message: "maintenance window".to_string(),
        },
        status: EventStatus::Pending,
        created_at: now,
        expires_at: now + Duration::minutes(5),
        version: 1,
    }
}

/// Storage pre-seeded with the given agents registered.
pub fn storage_with_agents(names: &[&str]) -> MemoryStorage {
    let storage = MemoryStorage::new();
    for name in names {
        storage
            .agent_insert(&make_test_agent(name))
            .unwrap_or_else(|e| panic!("seed agent {name}: {e}"));
    }
    storage
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Strategy over all dispatch priorities.
pub fn arb_dispatch_priority() -> impl Strategy<Value = DispatchPriority> {
    prop_oneof![
        Just(DispatchPriority::Urgent),
        Just(DispatchPriority::High),
        Just(DispatchPriority::Normal),
        Just(DispatchPriority::Low),
    ]
}

/// Strategy over all loop stages.
pub fn arb_loop_stage() -> impl Strategy<Value = LoopStage> {
    prop_oneof![
        Just(LoopStage::Pending),
        Just(LoopStage::Delivered),
        Just(LoopStage::Seen),
        Just(LoopStage::Replied),
        Just(LoopStage::Acted),
        Just(LoopStage::Reported),
    ]
}

/// Strategy over all message kinds.
pub fn arb_message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Handoff),
        Just(MessageKind::Update),
        Just(MessageKind::Request),
        Just(MessageKind::Fyi),
    ]
}

/// Strategy over all alert types.
pub fn arb_alert_type() -> impl Strategy<Value = AlertType> {
    prop_oneof![
        Just(AlertType::ReplyOverdue),
        Just(AlertType::ActionOverdue),
        Just(AlertType::ReportOverdue),
        Just(AlertType::LoopBroken),
        Just(AlertType::AgentFailed),
        Just(AlertType::RateLimited),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_insertable() {
        let storage = storage_with_agents(&["sam", "leo"]);
        storage.dispatch_insert(&make_test_dispatch("sam")).unwrap();
        storage
            .message_insert(&make_test_message("sam", "leo"))
            .unwrap();
        storage
            .alert_insert(&make_test_alert("sam", AlertType::ReplyOverdue))
            .unwrap();
        storage.event_insert(&make_test_event("leo")).unwrap();
        assert_eq!(storage.agent_count(), 2);
    }
}
