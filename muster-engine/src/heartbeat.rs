//! Heartbeat Monitor
//!
//! Agents check in on staggered slots within each quarter-hour. A check-in
//! reports pending-work signals (unread messages, unstarted dispatches, a
//! self-reported block) and feeds the per-agent circuit breaker: consecutive
//! misses trip it open, a cooldown moves it half-open, and a streak of
//! successful check-ins closes it again.

use chrono::{DateTime, Duration, Utc};
use muster_core::{
    new_entity_id, ActivityEntry, ActivityKind, Agent, AgentError, AgentHealth, AgentStatus,
    AlertSeverity, AlertType, BackoffLevel, CircuitState, EntityType, HeartbeatConfig,
    HeartbeatStatus, LoopStage, MusterError, MusterResult,
};
use muster_storage::{AgentUpdate, StorageTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::AlertEngine;

/// Phrases in an agent's working context that signal it is blocked.
const BLOCK_KEYWORDS: &[&str] = &["blocked", "stuck", "waiting"];

pub(crate) const SLOT_PERIOD_MINUTES: u32 = 15;

/// What one heartbeat check-in found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatOutcome {
    pub status: HeartbeatStatus,
    pub unread_messages: usize,
    pub pending_dispatches: usize,
    pub blocked: bool,
}

/// Outcome of one heartbeat sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatSweepOutcome {
    pub examined: usize,
    pub missed: usize,
    pub tripped: usize,
}

/// Heartbeat intake plus circuit breaker management.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    storage: Arc<dyn StorageTrait>,
    config: HeartbeatConfig,
    alerts: AlertEngine,
}

impl HeartbeatMonitor {
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        config: HeartbeatConfig,
        alerts: AlertEngine,
    ) -> Self {
        Self {
            storage,
            config,
            alerts,
        }
    }

    /// Minute offset within the quarter-hour for the nth registered agent.
    /// Slots stagger so agents never all check in at once.
    pub fn slot_for(&self, index: u32) -> u32 {
        (index * self.config.slot_stride_minutes) % SLOT_PERIOD_MINUTES
    }

    /// Record a heartbeat check-in from an agent.
    pub fn beat(
        &self,
        now: DateTime<Utc>,
        agent_name: &str,
        working_context: Option<String>,
    ) -> MusterResult<HeartbeatOutcome> {
        let agent = self.require_agent(agent_name)?;

        let unread_messages = self
            .storage
            .message_list_by_recipient(agent_name)?
            .into_iter()
            .filter(|m| !m.loop_broken && m.stage < LoopStage::Seen)
            .count();
        let pending_dispatches = self.storage.dispatch_pending_ordered(Some(agent_name))?.len();
        let blocked = working_context
            .as_deref()
            .map(context_reports_block)
            .unwrap_or(false);

        let status = if unread_messages == 0 && pending_dispatches == 0 && !blocked {
            HeartbeatStatus::Ok
        } else {
            HeartbeatStatus::PendingWork
        };

        // A heartbeat is a success signal for the breaker.
        let mut health = AgentHealth {
            consecutive_failures: 0,
            ..agent.health
        };
        let mut circuit = agent.circuit;
        if let CircuitState::HalfOpen { .. } = agent.circuit {
            health.recovery_successes += 1;
            if health.recovery_successes >= self.config.reset_successes {
                circuit = CircuitState::Closed;
                health.recovery_successes = 0;
                self.alerts.resolve_agent_failure(now, agent_name)?;
                info!(agent = agent_name, "circuit closed after recovery");
            }
        }

        let update = AgentUpdate {
            status: (agent.status == AgentStatus::Offline).then_some(AgentStatus::Online),
            last_heartbeat: Some(now),
            last_seen: Some(now),
            circuit: Some(circuit),
            health: Some(health),
            working_context: Some(working_context.clone()),
            ..Default::default()
        };
        self.storage.agent_update(agent.agent_id, agent.version, update)?;

        self.storage.activity_insert(&ActivityEntry {
            activity_id: new_entity_id(),
            agent_name: agent_name.to_string(),
            kind: ActivityKind::Heartbeat,
            body: match status {
                HeartbeatStatus::Ok => "ok".to_string(),
                HeartbeatStatus::PendingWork => format!(
                    "pending work: {unread_messages} unread, {pending_dispatches} dispatches{}",
                    if blocked { ", blocked" } else { "" }
                ),
            },
            created_at: now,
        })?;

        Ok(HeartbeatOutcome {
            status,
            unread_messages,
            pending_dispatches,
            blocked,
        })
    }

    /// Record a missed heartbeat, tripping the breaker when the miss budget
    /// runs out. A miss while half-open re-opens at the next backoff level.
    pub fn record_miss(&self, now: DateTime<Utc>, agent_name: &str) -> MusterResult<Agent> {
        let agent = self.require_agent(agent_name)?;
        let mut health = AgentHealth {
            consecutive_failures: agent.health.consecutive_failures + 1,
            recovery_successes: 0,
            ..agent.health
        };
        let mut circuit = agent.circuit;
        let mut status = agent.status;

        match agent.circuit {
            CircuitState::Closed => {
                if health.consecutive_failures >= self.config.trip_threshold {
                    circuit = CircuitState::trip(now, BackoffLevel::L0);
                    status = AgentStatus::Offline;
                    self.raise_failure(now, agent_name, health.consecutive_failures)?;
                }
            }
            CircuitState::HalfOpen { level } => {
                // The probe failed; back off harder.
                circuit = CircuitState::trip(now, level.escalate());
                status = AgentStatus::Offline;
                health.recovery_successes = 0;
                self.raise_failure(now, agent_name, health.consecutive_failures)?;
            }
            CircuitState::Open { .. } => {}
        }

        let update = AgentUpdate {
            status: (status != agent.status).then_some(status),
            status_reason: (status != agent.status)
                .then(|| Some("missed heartbeats".to_string())),
            status_since: (status != agent.status).then_some(now),
            circuit: Some(circuit),
            health: Some(health),
            ..Default::default()
        };
        let updated = self
            .storage
            .agent_update(agent.agent_id, agent.version, update)?;
        if updated.circuit.is_tripped() && !agent.circuit.is_tripped() {
            warn!(agent = agent_name, "circuit tripped");
        }
        Ok(updated)
    }

    /// Find agents whose heartbeat is older than interval plus grace and
    /// record a miss for each. Agents already in cooldown are left alone.
    pub fn heartbeat_sweep(&self, now: DateTime<Utc>) -> MusterResult<HeartbeatSweepOutcome> {
        let deadline = self.window(self.config.interval) + self.window(self.config.grace);
        let mut outcome = HeartbeatSweepOutcome::default();
        for agent in self.storage.agent_list(false)? {
            if matches!(agent.circuit, CircuitState::Open { .. }) {
                continue;
            }
            outcome.examined += 1;
            let last = agent.last_heartbeat.unwrap_or(agent.created_at);
            if last + deadline > now {
                continue;
            }
            match self.record_miss(now, &agent.name) {
                Ok(updated) => {
                    outcome.missed += 1;
                    if updated.circuit.is_tripped() && !agent.circuit.is_tripped() {
                        outcome.tripped += 1;
                    }
                }
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "heartbeat sweep skip");
                }
            }
        }
        Ok(outcome)
    }

    /// Move agents whose cooldown has lapsed from open to half-open, giving
    /// them another chance to prove themselves. Returns how many moved.
    pub fn breaker_sweep(&self, now: DateTime<Utc>) -> MusterResult<usize> {
        let mut moved = 0;
        for agent in self.storage.agent_list(false)? {
            let CircuitState::Open { until, level } = agent.circuit else {
                continue;
            };
            if until > now {
                continue;
            }
            let health = AgentHealth {
                restart_count: agent.health.restart_count + 1,
                last_restart_at: Some(now),
                recovery_successes: 0,
                ..agent.health
            };
            self.storage.agent_update(
                agent.agent_id,
                agent.version,
                AgentUpdate {
                    circuit: Some(CircuitState::HalfOpen { level }),
                    health: Some(health),
                    ..Default::default()
                },
            )?;
            info!(agent = %agent.name, "circuit half-open, probing recovery");
            moved += 1;
        }
        Ok(moved)
    }

    fn raise_failure(
        &self,
        now: DateTime<Utc>,
        agent_name: &str,
        misses: i32,
    ) -> MusterResult<()> {
        self.alerts.raise(
            now,
            None,
            agent_name,
            AlertType::AgentFailed,
            AlertSeverity::Critical,
            &format!("{misses} consecutive missed heartbeats"),
        )?;
        Ok(())
    }

    fn require_agent(&self, name: &str) -> MusterResult<Agent> {
        self.storage
            .agent_get_by_name(name)?
            .filter(|a| !a.retired)
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

fn context_reports_block(context: &str) -> bool {
    let lowered = context.to_lowercase();
    BLOCK_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use muster_test_utils::{make_test_dispatch, make_test_message, storage_with_agents, MemoryStorage};

    fn monitor() -> (Arc<MemoryStorage>, HeartbeatMonitor) {
        let storage = Arc::new(storage_with_agents(&["sam", "leo"]));
        let alerts = AlertEngine::new(storage.clone());
        let monitor = HeartbeatMonitor::new(storage.clone(), HeartbeatConfig::default(), alerts);
        (storage, monitor)
    }

    fn trip(monitor: &HeartbeatMonitor, now: DateTime<Utc>, agent: &str) {
        for _ in 0..3 {
            monitor.record_miss(now, agent).unwrap();
        }
    }

    #[test]
    fn test_slots_stagger_within_quarter_hour() {
        let (_, monitor) = monitor();
        let slots: Vec<u32> = (0..6).map(|i| monitor.slot_for(i)).collect();
        assert_eq!(slots, vec![0, 5, 10, 0, 5, 10]);
    }

    #[test]
    fn test_beat_reports_ok_when_idle() {
        let (_, monitor) = monitor();
        let outcome = monitor.beat(Utc::now(), "sam", None).unwrap();
        assert_eq!(outcome.status, HeartbeatStatus::Ok);
        assert_eq!(outcome.unread_messages, 0);
        assert_eq!(outcome.pending_dispatches, 0);
        assert!(!outcome.blocked);
    }

    #[test]
    fn test_beat_reports_pending_work_signals() {
        let (storage, monitor) = monitor();
        storage
            .message_insert(&make_test_message("leo", "sam"))
            .unwrap();
        storage.dispatch_insert(&make_test_dispatch("sam")).unwrap();

        let outcome = monitor
            .beat(Utc::now(), "sam", Some("stuck on flaky CI".to_string()))
            .unwrap();
        assert_eq!(outcome.status, HeartbeatStatus::PendingWork);
        assert_eq!(outcome.unread_messages, 1);
        assert_eq!(outcome.pending_dispatches, 1);
        assert!(outcome.blocked);
    }

    #[test]
    fn test_beat_updates_agent_and_appends_activity() {
        let (storage, monitor) = monitor();
        let now = Utc::now();
        monitor.beat(now, "sam", Some("reviewing PRs".to_string())).unwrap();

        let agent = storage.agent_get_by_name("sam").unwrap().unwrap();
        assert_eq!(agent.last_heartbeat, Some(now));
        assert_eq!(agent.working_context.as_deref(), Some("reviewing PRs"));

        let feed = storage.activity_list(Some("sam"), 10).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].kind, ActivityKind::Heartbeat);
    }

    #[test]
    fn test_misses_trip_breaker_at_threshold() {
        let (storage, monitor) = monitor();
        let now = Utc::now();

        monitor.record_miss(now, "sam").unwrap();
        monitor.record_miss(now, "sam").unwrap();
        let agent = storage.agent_get_by_name("sam").unwrap().unwrap();
        assert!(!agent.circuit.is_tripped());

        let agent = monitor.record_miss(now, "sam").unwrap();
        assert!(matches!(
            agent.circuit,
            CircuitState::Open {
                level: BackoffLevel::L0,
                ..
            }
        ));
        assert_eq!(agent.status, AgentStatus::Offline);

        let alert = storage
            .alert_find_open(None, "sam", AlertType::AgentFailed)
            .unwrap();
        assert!(alert.is_some());
    }

    #[test]
    fn test_breaker_sweep_moves_to_half_open_after_cooldown() {
        let (storage, monitor) = monitor();
        let now = Utc::now();
        trip(&monitor, now, "sam");

        // Cooldown not lapsed yet.
        assert_eq!(monitor.breaker_sweep(now + Duration::seconds(30)).unwrap(), 0);

        let moved = monitor.breaker_sweep(now + Duration::seconds(61)).unwrap();
        assert_eq!(moved, 1);
        let agent = storage.agent_get_by_name("sam").unwrap().unwrap();
        assert!(matches!(
            agent.circuit,
            CircuitState::HalfOpen {
                level: BackoffLevel::L0
            }
        ));
        assert_eq!(agent.health.restart_count, 1);
        assert!(agent.health.last_restart_at.is_some());
    }

    #[test]
    fn test_half_open_miss_escalates_backoff() {
        let (storage, monitor) = monitor();
        let now = Utc::now();
        trip(&monitor, now, "sam");
        monitor.breaker_sweep(now + Duration::seconds(61)).unwrap();

        let agent = monitor
            .record_miss(now + Duration::seconds(90), "sam")
            .unwrap();
        assert!(matches!(
            agent.circuit,
            CircuitState::Open {
                level: BackoffLevel::L1,
                ..
            }
        ));

        // The original trip's alert is still open.
        assert!(storage
            .alert_find_open(None, "sam", AlertType::AgentFailed)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_recovery_streak_closes_breaker_and_resolves_alert() {
        let (storage, monitor) = monitor();
        let now = Utc::now();
        trip(&monitor, now, "sam");
        monitor.breaker_sweep(now + Duration::seconds(61)).unwrap();

        for i in 0..2 {
            monitor
                .beat(now + Duration::minutes(2 + i), "sam", None)
                .unwrap();
            let agent = storage.agent_get_by_name("sam").unwrap().unwrap();
            assert!(matches!(agent.circuit, CircuitState::HalfOpen { .. }));
        }

        monitor.beat(now + Duration::minutes(5), "sam", None).unwrap();
        let agent = storage.agent_get_by_name("sam").unwrap().unwrap();
        assert_eq!(agent.circuit, CircuitState::Closed);
        assert_eq!(agent.health.recovery_successes, 0);
        assert_eq!(agent.status, AgentStatus::Online);
        assert!(storage
            .alert_find_open(None, "sam", AlertType::AgentFailed)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_heartbeat_sweep_detects_stale_agents() {
        let (storage, monitor) = monitor();
        let now = Utc::now();
        // sam checked in recently, leo long ago.
        monitor.beat(now, "sam", None).unwrap();
        let leo = storage.agent_get_by_name("leo").unwrap().unwrap();
        storage
            .agent_update(
                leo.agent_id,
                leo.version,
                AgentUpdate {
                    last_heartbeat: Some(now - Duration::minutes(30)),
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = monitor.heartbeat_sweep(now).unwrap();
        assert_eq!(outcome.examined, 2);
        assert_eq!(outcome.missed, 1);
        assert_eq!(outcome.tripped, 0);

        let leo = storage.agent_get_by_name("leo").unwrap().unwrap();
        assert_eq!(leo.health.consecutive_failures, 1);
    }

    #[test]
    fn test_heartbeat_sweep_skips_open_breakers() {
        let (_, monitor) = monitor();
        let now = Utc::now();
        trip(&monitor, now, "sam");

        let outcome = monitor.heartbeat_sweep(now + Duration::minutes(30)).unwrap();
        // sam is cooling down; only leo is examined.
        assert_eq!(outcome.examined, 1);
    }

    #[test]
    fn test_block_keyword_detection() {
        assert!(context_reports_block("Blocked on the schema migration"));
        assert!(context_reports_block("waiting for review"));
        assert!(context_reports_block("completely STUCK"));
        assert!(!context_reports_block("cruising through the backlog"));
    }
}
