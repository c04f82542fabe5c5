//! Message Loop
//!
//! Tracks every directed message through the five-stage loop:
//! pending -> delivered -> seen -> replied -> acted -> reported.
//!
//! Stages only move forward. Advancing to a stage fills any skipped
//! intermediate timestamps and starts the deadline clock for the next stage;
//! the SLA sweep turns missed deadlines into alerts and escalates the worst
//! ones to the supervisor.

use chrono::{DateTime, Duration, Utc};
use muster_core::{
    new_entity_id, ActivityEntry, ActivityKind, AgentError, AlertSeverity, AlertType, EntityType,
    EventPayload, LoopError, LoopMessage, LoopStage, MessageKind, MessagePriority, MusterError,
    MusterResult, SlaConfig, ValidationError,
};
use muster_storage::{MessageUpdate, StorageTrait};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::AlertEngine;
use crate::events::EventBus;

const PREVIEW_LEN: usize = 80;

/// Request to send a directed message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub from_agent: String,
    pub to_agent: String,
    pub kind: MessageKind,
    pub content: String,
    pub task_ref: Option<String>,
    pub priority: MessagePriority,
}

/// Outcome of one SLA sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlaSweepOutcome {
    pub examined: usize,
    pub raised: usize,
    pub escalated: usize,
    pub skipped: usize,
}

/// The loop tracker over the shared store.
#[derive(Clone)]
pub struct LoopTracker {
    storage: Arc<dyn StorageTrait>,
    config: SlaConfig,
    alerts: AlertEngine,
    bus: EventBus,
}

impl LoopTracker {
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        config: SlaConfig,
        alerts: AlertEngine,
        bus: EventBus,
    ) -> Self {
        Self {
            storage,
            config,
            alerts,
            bus,
        }
    }

    /// Send a directed message and notify the recipient through the bus.
    pub fn send(&self, now: DateTime<Utc>, req: NewMessage) -> MusterResult<LoopMessage> {
        if req.content.trim().is_empty() {
            return Err(MusterError::Validation(ValidationError {
                field: "content".to_string(),
                reason: "must not be empty".to_string(),
            }));
        }
        self.require_agent(&req.from_agent)?;
        self.require_agent(&req.to_agent)?;

        let message = LoopMessage {
            message_id: new_entity_id(),
            from_agent: req.from_agent.clone(),
            to_agent: req.to_agent.clone(),
            kind: req.kind,
            content: req.content,
            task_ref: req.task_ref,
            priority: req.priority,
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
            created_at: now,
            version: 1,
        };
        self.storage.message_insert(&message)?;
        info!(
            from = %message.from_agent,
            to = %message.to_agent,
            kind = %message.kind,
            "message sent"
        );

        let preview: String = message.content.chars().take(PREVIEW_LEN).collect();
        let payload = match message.kind {
            MessageKind::Handoff => EventPayload::Handoff {
                from_agent: message.from_agent.clone(),
                task_ref: message.task_ref.clone(),
                message: preview,
            },
            _ => EventPayload::Mention {
                from_agent: message.from_agent.clone(),
                message_id: message.message_id,
                kind: message.kind,
                preview,
            },
        };
        self.bus.publish(now, &message.to_agent, payload)?;
        Ok(message)
    }

    /// Post a broadcast to the activity feed. Broadcasts are not messages
    /// and never enter the loop.
    pub fn broadcast(
        &self,
        now: DateTime<Utc>,
        from_agent: &str,
        content: &str,
    ) -> MusterResult<ActivityEntry> {
        if content.trim().is_empty() {
            return Err(MusterError::Validation(ValidationError {
                field: "content".to_string(),
                reason: "must not be empty".to_string(),
            }));
        }
        self.require_agent(from_agent)?;
        let entry = ActivityEntry {
            activity_id: new_entity_id(),
            agent_name: from_agent.to_string(),
            kind: ActivityKind::Broadcast,
            body: content.to_string(),
            created_at: now,
        };
        self.storage.activity_insert(&entry)?;
        Ok(entry)
    }

    /// Fetch an agent's inbox: everything not yet seen. Pending messages are
    /// flipped to delivered on the way out.
    pub fn deliver_inbox(
        &self,
        now: DateTime<Utc>,
        agent_name: &str,
    ) -> MusterResult<Vec<LoopMessage>> {
        self.require_agent(agent_name)?;
        let mut inbox = Vec::new();
        for message in self.storage.message_list_by_recipient(agent_name)? {
            if message.loop_broken || message.stage >= LoopStage::Seen {
                continue;
            }
            if message.stage == LoopStage::Pending {
                inbox.push(self.storage.message_update(
                    message.message_id,
                    message.version,
                    MessageUpdate {
                        stage: Some(LoopStage::Delivered),
                        delivered_at: Some(now),
                        ..Default::default()
                    },
                )?);
            } else {
                inbox.push(message);
            }
        }
        Ok(inbox)
    }

    /// Count of messages an agent has not yet seen.
    pub fn unread_count(&self, agent_name: &str) -> MusterResult<usize> {
        Ok(self
            .storage
            .message_list_by_recipient(agent_name)?
            .into_iter()
            .filter(|m| !m.loop_broken && m.stage < LoopStage::Seen)
            .count())
    }

    /// Advance a message to `to_stage`.
    ///
    /// Moving to the current stage or backwards is an idempotent no-op.
    /// Skipped intermediate stages get their timestamps filled with `now`,
    /// and each newly reached stage starts its follow-up deadline.
    pub fn advance(
        &self,
        now: DateTime<Utc>,
        message_id: Uuid,
        to_stage: LoopStage,
    ) -> MusterResult<LoopMessage> {
        let message = self.get_required(message_id)?;
        if message.loop_broken {
            return Err(MusterError::Loop(LoopError::LoopBroken {
                id: message_id,
                reason: message
                    .loop_broken_reason
                    .unwrap_or_else(|| "unknown".to_string()),
            }));
        }
        if to_stage <= message.stage {
            return Ok(message);
        }

        let mut update = MessageUpdate {
            stage: Some(to_stage),
            ..Default::default()
        };
        for stage in [
            LoopStage::Delivered,
            LoopStage::Seen,
            LoopStage::Replied,
            LoopStage::Acted,
            LoopStage::Reported,
        ] {
            if stage <= message.stage || stage > to_stage {
                continue;
            }
            match stage {
                LoopStage::Delivered => update.delivered_at = Some(now),
                LoopStage::Seen => {
                    update.seen_at = Some(now);
                    update.expected_reply_by = Some(now + self.window(self.config.reply_window));
                }
                LoopStage::Replied => {
                    update.replied_at = Some(now);
                    update.expected_action_by = Some(now + self.window(self.config.action_window));
                }
                LoopStage::Acted => {
                    update.acted_at = Some(now);
                    update.expected_report_by = Some(now + self.window(self.config.report_window));
                }
                LoopStage::Reported => update.reported_at = Some(now),
                LoopStage::Pending => {}
            }
        }

        let advanced = self
            .storage
            .message_update(message_id, message.version, update)?;
        self.alerts.resolve_for_stage(now, message_id, to_stage)?;
        info!(
            message_id = %message_id,
            stage = %advanced.stage,
            "loop advanced"
        );
        Ok(advanced)
    }

    /// Advance every unseen message in an agent's inbox to seen.
    pub fn mark_all_read(&self, now: DateTime<Utc>, agent_name: &str) -> MusterResult<usize> {
        self.require_agent(agent_name)?;
        let mut marked = 0;
        for message in self.storage.message_list_by_recipient(agent_name)? {
            if message.loop_broken || message.stage >= LoopStage::Seen {
                continue;
            }
            self.advance(now, message.message_id, LoopStage::Seen)?;
            marked += 1;
        }
        Ok(marked)
    }

    /// Abandon a loop. Any participant may break it; open deadline alerts on
    /// the message are resolved and a loop-broken alert records who did it.
    pub fn break_loop(
        &self,
        now: DateTime<Utc>,
        message_id: Uuid,
        by: &str,
        reason: &str,
    ) -> MusterResult<LoopMessage> {
        let message = self.get_required(message_id)?;
        if message.loop_broken {
            return Ok(message);
        }
        let broken = self.storage.message_update(
            message_id,
            message.version,
            MessageUpdate {
                loop_broken: Some(true),
                loop_broken_reason: Some(reason.to_string()),
                ..Default::default()
            },
        )?;
        self.alerts.resolve_all_for_message(now, message_id)?;
        self.alerts.raise(
            now,
            Some(message_id),
            by,
            AlertType::LoopBroken,
            AlertSeverity::Warning,
            &format!("loop broken by {by}: {reason}"),
        )?;
        warn!(message_id = %message_id, by = by, "loop broken");
        Ok(broken)
    }

    /// Sweep open loops for missed deadlines.
    ///
    /// Reply overdue raises a warning; action overdue raises a warning that
    /// turns critical once a second window lapses; report overdue raises a
    /// critical alert and escalates it to the supervisor. Per-message errors
    /// are logged and skipped so one bad record cannot stall the sweep.
    pub fn sla_sweep(&self, now: DateTime<Utc>) -> MusterResult<SlaSweepOutcome> {
        let mut outcome = SlaSweepOutcome::default();
        for message in self.storage.message_list_open()? {
            outcome.examined += 1;
            if let Err(e) = self.sweep_one(now, &message, &mut outcome) {
                outcome.skipped += 1;
                warn!(message_id = %message.message_id, error = %e, "sla sweep skip");
            }
        }
        if outcome.raised > 0 || outcome.escalated > 0 {
            info!(
                examined = outcome.examined,
                raised = outcome.raised,
                escalated = outcome.escalated,
                "sla sweep"
            );
        }
        Ok(outcome)
    }

    fn sweep_one(
        &self,
        now: DateTime<Utc>,
        message: &LoopMessage,
        outcome: &mut SlaSweepOutcome,
    ) -> MusterResult<()> {
        let accountable = message.to_agent.as_str();

        if message.stage == LoopStage::Seen {
            if let Some(by) = message.expected_reply_by {
                if now > by {
                    self.alerts.raise(
                        now,
                        Some(message.message_id),
                        accountable,
                        AlertType::ReplyOverdue,
                        AlertSeverity::Warning,
                        &format!("no reply to {} since seen", message.from_agent),
                    )?;
                    outcome.raised += 1;
                }
            }
        }

        if message.stage == LoopStage::Replied {
            if let Some(by) = message.expected_action_by {
                if now > by {
                    let alert = self.alerts.raise(
                        now,
                        Some(message.message_id),
                        accountable,
                        AlertType::ActionOverdue,
                        AlertSeverity::Warning,
                        "promised action not taken",
                    )?;
                    outcome.raised += 1;
                    // A second lapsed window turns the warning critical.
                    if now > by + self.window(self.config.action_window) {
                        self.alerts.ensure_severity(&alert, AlertSeverity::Critical)?;
                    }
                }
            }
        }

        if message.stage == LoopStage::Acted {
            if let Some(by) = message.expected_report_by {
                if now > by {
                    let alert = self.alerts.raise(
                        now,
                        Some(message.message_id),
                        accountable,
                        AlertType::ReportOverdue,
                        AlertSeverity::Critical,
                        "work done but never reported back",
                    )?;
                    outcome.raised += 1;
                    let escalated =
                        self.alerts.escalate(now, &alert, &self.config.supervisor)?;
                    if escalated.version != alert.version {
                        outcome.escalated += 1;
                    }
                }
            }
        }

        Ok(())
    }

    /// Fetch one message.
    pub fn get(&self, message_id: Uuid) -> MusterResult<Option<LoopMessage>> {
        self.storage.message_get(message_id)
    }

    fn get_required(&self, message_id: Uuid) -> MusterResult<LoopMessage> {
        self.storage
            .message_get(message_id)?
            .ok_or(MusterError::not_found(EntityType::Message, message_id))
    }

    fn require_agent(&self, name: &str) -> MusterResult<()> {
        self.storage
            .agent_get_by_name(name)?
            .filter(|a| !a.retired)
            .map(|_| ())
            .ok_or_else(|| {
                MusterError::Agent(AgentError::NotRegistered {
                    name: name.to_string(),
                })
            })
    }

    fn window(&self, window: std::time::Duration) -> Duration {
        Duration::from_std(window).unwrap_or_else(|_| Duration::minutes(15))
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use muster_core::EventConfig;
    use muster_test_utils::{arb_loop_stage, storage_with_agents};
    use proptest::prelude::*;

    fn tracker() -> LoopTracker {
        let storage = Arc::new(storage_with_agents(&["sam", "leo", "supervisor"]));
        let alerts = AlertEngine::new(storage.clone());
        let bus = EventBus::new(storage.clone(), EventConfig::default());
        LoopTracker::new(storage, SlaConfig::default(), alerts, bus)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The stage never moves backwards, whatever order advances arrive in.
        #[test]
        fn prop_stage_is_monotonic(
            stages in proptest::collection::vec(arb_loop_stage(), 1..8)
        ) {
            let tracker = tracker();
            let now = Utc::now();
            let message = tracker.send(now, NewMessage {
                from_agent: "sam".to_string(),
                to_agent: "leo".to_string(),
                kind: MessageKind::Request,
                content: "check".to_string(),
                task_ref: None,
                priority: MessagePriority::Normal,
            }).unwrap();

            let mut highest = LoopStage::Pending;
            for stage in stages {
                let after = tracker.advance(now, message.message_id, stage).unwrap();
                highest = highest.max(stage);
                prop_assert_eq!(after.stage, highest);
            }
        }

        /// Every reached stage carries a timestamp; unreached stages do not.
        #[test]
        fn prop_timestamps_match_reached_stages(stage in arb_loop_stage()) {
            let tracker = tracker();
            let now = Utc::now();
            let message = tracker.send(now, NewMessage {
                from_agent: "sam".to_string(),
                to_agent: "leo".to_string(),
                kind: MessageKind::Update,
                content: "check".to_string(),
                task_ref: None,
                priority: MessagePriority::Normal,
            }).unwrap();

            let after = tracker.advance(now, message.message_id, stage).unwrap();
            prop_assert_eq!(after.delivered_at.is_some(), stage >= LoopStage::Delivered);
            prop_assert_eq!(after.seen_at.is_some(), stage >= LoopStage::Seen);
            prop_assert_eq!(after.replied_at.is_some(), stage >= LoopStage::Replied);
            prop_assert_eq!(after.acted_at.is_some(), stage >= LoopStage::Acted);
            prop_assert_eq!(after.reported_at.is_some(), stage >= LoopStage::Reported);
        }
    }
}
