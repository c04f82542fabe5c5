//! Dispatch Queue
//!
//! Priority work queue with claim exclusivity and bounded retries. Claiming
//! is a compare-and-swap on the dispatch's version: of N concurrent claimers
//! exactly one transitions pending -> running, the rest get `AlreadyClaimed`.
//!
//! A failed dispatch with retries left spawns a fresh pending clone gated by
//! the backoff schedule; the clone chain always points at the root dispatch.

use chrono::{DateTime, Duration, Utc};
use muster_core::{
    new_entity_id, AgentError, Dispatch, DispatchConfig, DispatchError, DispatchPriority,
    DispatchStatus, EntityType, EventPayload, MusterError, MusterResult, StorageError,
    ValidationError,
};
use muster_storage::{DispatchUpdate, StorageTrait};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::AlertEngine;
use crate::events::EventBus;
use muster_core::{AlertSeverity, AlertType};

/// Request to enqueue a dispatch.
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub agent_name: String,
    pub command: String,
    pub payload: Option<serde_json::Value>,
    pub priority: DispatchPriority,
    /// Override for the configured retry budget.
    pub max_retries: Option<i32>,
}

/// Outcome of the stuck-dispatch sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StuckSweepOutcome {
    pub examined: usize,
    pub failed: usize,
    pub retried: usize,
}

/// Priority dispatch queue over the shared store.
#[derive(Clone)]
pub struct DispatchQueue {
    storage: Arc<dyn StorageTrait>,
    config: DispatchConfig,
    alerts: AlertEngine,
    bus: EventBus,
}

impl DispatchQueue {
    pub fn new(
        storage: Arc<dyn StorageTrait>,
        config: DispatchConfig,
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

    /// Enqueue a dispatch for a registered agent and notify it.
    pub fn create(&self, now: DateTime<Utc>, req: NewDispatch) -> MusterResult<Dispatch> {
        if req.command.trim().is_empty() {
            return Err(MusterError::Validation(ValidationError {
                field: "command".to_string(),
                reason: "must not be empty".to_string(),
            }));
        }
        let agent = self
            .storage
            .agent_get_by_name(&req.agent_name)?
            .filter(|a| !a.retired)
            .ok_or_else(|| {
                MusterError::Agent(AgentError::NotRegistered {
                    name: req.agent_name.clone(),
                })
            })?;

        let dispatch = Dispatch {
            dispatch_id: new_entity_id(),
            agent_name: agent.name.clone(),
            command: req.command,
            payload: req.payload,
            status: DispatchStatus::Pending,
            priority: req.priority,
            is_urgent: req.priority == DispatchPriority::Urgent,
            retry_count: 0,
            max_retries: req.max_retries.unwrap_or(self.config.max_retries),
            next_retry_at: None,
            original_dispatch_id: None,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            version: 1,
        };
        self.storage.dispatch_insert(&dispatch)?;
        info!(
            agent = %dispatch.agent_name,
            command = %dispatch.command,
            priority = %dispatch.priority,
            "dispatch queued"
        );

        self.bus.publish(
            now,
            &agent.name,
            EventPayload::Dispatch {
                dispatch_id: dispatch.dispatch_id,
                command: dispatch.command.clone(),
                priority: dispatch.priority,
            },
        )?;
        Ok(dispatch)
    }

    /// Peek at the next claimable dispatch for an agent without claiming it.
    ///
    /// Returns `None` when the queue is empty, every pending dispatch is
    /// still inside its retry backoff, or the agent's breaker is open.
    pub fn next(&self, now: DateTime<Utc>, agent_name: &str) -> MusterResult<Option<Dispatch>> {
        let agent = self
            .storage
            .agent_get_by_name(agent_name)?
            .ok_or_else(|| {
                MusterError::Agent(AgentError::NotRegistered {
                    name: agent_name.to_string(),
                })
            })?;
        if !agent.is_dispatchable() {
            return Ok(None);
        }
        let pending = self.storage.dispatch_pending_ordered(Some(agent_name))?;
        Ok(pending.into_iter().find(|d| d.is_claimable(now)))
    }

    /// Peek at the next claimable dispatch across every dispatchable agent.
    pub fn next_any(&self, now: DateTime<Utc>) -> MusterResult<Option<Dispatch>> {
        for candidate in self.storage.dispatch_pending_ordered(None)? {
            if !candidate.is_claimable(now) {
                continue;
            }
            let dispatchable = self
                .storage
                .agent_get_by_name(&candidate.agent_name)?
                .is_some_and(|a| a.is_dispatchable());
            if dispatchable {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Claim a pending dispatch, transitioning it to running.
    ///
    /// Exactly one concurrent claimer wins; the rest get `AlreadyClaimed`.
    pub fn claim(&self, now: DateTime<Utc>, dispatch_id: Uuid) -> MusterResult<Dispatch> {
        let dispatch = self.get_required(dispatch_id)?;
        if dispatch.status != DispatchStatus::Pending {
            return Err(self.transition_error(&dispatch, DispatchStatus::Running));
        }
        if !dispatch.is_claimable(now) {
            return Err(MusterError::Dispatch(DispatchError::InvalidTransition {
                id: dispatch_id,
                from: "pending (backoff)".to_string(),
                to: DispatchStatus::Running.to_string(),
            }));
        }

        let result = self.storage.dispatch_update(
            dispatch_id,
            dispatch.version,
            DispatchUpdate {
                status: Some(DispatchStatus::Running),
                started_at: Some(now),
                ..Default::default()
            },
        );
        match result {
            Ok(claimed) => Ok(claimed),
            // A concurrent claimer got there first.
            Err(MusterError::Storage(StorageError::VersionConflict { .. })) => Err(
                MusterError::Dispatch(DispatchError::AlreadyClaimed { id: dispatch_id }),
            ),
            Err(e) => Err(e),
        }
    }

    /// Complete a running dispatch with an optional result payload.
    pub fn complete(
        &self,
        now: DateTime<Utc>,
        dispatch_id: Uuid,
        result: Option<serde_json::Value>,
    ) -> MusterResult<Dispatch> {
        let dispatch = self.get_required(dispatch_id)?;
        if dispatch.status != DispatchStatus::Running {
            return Err(self.transition_error(&dispatch, DispatchStatus::Completed));
        }
        self.storage.dispatch_update(
            dispatch_id,
            dispatch.version,
            DispatchUpdate {
                status: Some(DispatchStatus::Completed),
                result,
                completed_at: Some(now),
                ..Default::default()
            },
        )
    }

    /// Fail a dispatch. With retries left, a clone is scheduled behind the
    /// backoff gate; otherwise a critical agent-failure alert is raised.
    /// Returns the failed record and the retry clone, if one was made.
    pub fn fail(
        &self,
        now: DateTime<Utc>,
        dispatch_id: Uuid,
        error: &str,
    ) -> MusterResult<(Dispatch, Option<Dispatch>)> {
        let dispatch = self.get_required(dispatch_id)?;
        if !dispatch.status.can_transition_to(DispatchStatus::Failed) {
            return Err(self.transition_error(&dispatch, DispatchStatus::Failed));
        }
        let failed = self.storage.dispatch_update(
            dispatch_id,
            dispatch.version,
            DispatchUpdate {
                status: Some(DispatchStatus::Failed),
                error: Some(error.to_string()),
                completed_at: Some(now),
                ..Default::default()
            },
        )?;

        if !failed.retries_remaining() {
            warn!(
                agent = %failed.agent_name,
                command = %failed.command,
                retry_count = failed.retry_count,
                "dispatch exhausted retries"
            );
            self.alerts.raise(
                now,
                None,
                &failed.agent_name,
                AlertType::AgentFailed,
                AlertSeverity::Critical,
                &format!(
                    "dispatch '{}' failed {} times: {}",
                    failed.command,
                    failed.retry_count + 1,
                    error
                ),
            )?;
            return Ok((failed, None));
        }

        let backoff = Duration::from_std(self.config.backoff_for(failed.retry_count))
            .unwrap_or_else(|_| Duration::minutes(1));
        let retry = Dispatch {
            dispatch_id: new_entity_id(),
            retry_count: failed.retry_count + 1,
            status: DispatchStatus::Pending,
            next_retry_at: Some(now + backoff),
            original_dispatch_id: failed.original_dispatch_id.or(Some(failed.dispatch_id)),
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            version: 1,
            ..failed.clone()
        };
        self.storage.dispatch_insert(&retry)?;
        info!(
            agent = %retry.agent_name,
            retry_count = retry.retry_count,
            backoff_secs = backoff.num_seconds(),
            "dispatch retry scheduled"
        );
        Ok((failed, Some(retry)))
    }

    /// Force-fail a dispatch with no retry, for operator intervention.
    pub fn interrupt(
        &self,
        now: DateTime<Utc>,
        dispatch_id: Uuid,
        reason: &str,
    ) -> MusterResult<Dispatch> {
        let dispatch = self.get_required(dispatch_id)?;
        if !dispatch.status.can_transition_to(DispatchStatus::Failed) {
            return Err(self.transition_error(&dispatch, DispatchStatus::Failed));
        }
        self.storage.dispatch_update(
            dispatch_id,
            dispatch.version,
            DispatchUpdate {
                status: Some(DispatchStatus::Failed),
                error: Some(format!("interrupted: {reason}")),
                completed_at: Some(now),
                ..Default::default()
            },
        )
    }

    /// Force-fail every live dispatch for an agent. No retries are spawned.
    /// Returns how many dispatches were cleared.
    pub fn reset_agent(&self, now: DateTime<Utc>, agent_name: &str) -> MusterResult<usize> {
        let mut cleared = 0;
        for dispatch in self.storage.dispatch_list_by_agent(agent_name)? {
            if dispatch.status.is_terminal() {
                continue;
            }
            self.storage.dispatch_update(
                dispatch.dispatch_id,
                dispatch.version,
                DispatchUpdate {
                    status: Some(DispatchStatus::Failed),
                    error: Some("agent queue reset".to_string()),
                    completed_at: Some(now),
                    ..Default::default()
                },
            )?;
            cleared += 1;
        }
        if cleared > 0 {
            info!(agent = agent_name, cleared, "agent dispatch queue reset");
        }
        Ok(cleared)
    }

    /// Fail running dispatches older than the stuck threshold. Retries are
    /// scheduled through the normal failure path.
    pub fn cleanup_stuck(&self, now: DateTime<Utc>) -> MusterResult<StuckSweepOutcome> {
        let stuck_age =
            Duration::from_std(self.config.stuck_age).unwrap_or_else(|_| Duration::minutes(30));
        let mut outcome = StuckSweepOutcome::default();
        for dispatch in self.storage.dispatch_list_running()? {
            outcome.examined += 1;
            let started = dispatch.started_at.unwrap_or(dispatch.created_at);
            if started + stuck_age > now {
                continue;
            }
            match self.fail(now, dispatch.dispatch_id, "stuck: no completion") {
                Ok((_, retry)) => {
                    outcome.failed += 1;
                    if retry.is_some() {
                        outcome.retried += 1;
                    }
                }
                Err(e) => {
                    // Another worker may have completed it; skip and move on.
                    warn!(dispatch_id = %dispatch.dispatch_id, error = %e, "stuck sweep skip");
                }
            }
        }
        Ok(outcome)
    }

    /// List all dispatches for an agent, newest first.
    pub fn list_for_agent(&self, agent_name: &str) -> MusterResult<Vec<Dispatch>> {
        self.storage.dispatch_list_by_agent(agent_name)
    }

    /// Fetch one dispatch.
    pub fn get(&self, dispatch_id: Uuid) -> MusterResult<Option<Dispatch>> {
        self.storage.dispatch_get(dispatch_id)
    }

    fn get_required(&self, dispatch_id: Uuid) -> MusterResult<Dispatch> {
        self.storage
            .dispatch_get(dispatch_id)?
            .ok_or(MusterError::not_found(EntityType::Dispatch, dispatch_id))
    }

    fn transition_error(&self, dispatch: &Dispatch, to: DispatchStatus) -> MusterError {
        if dispatch.status == DispatchStatus::Running && to == DispatchStatus::Running {
            return MusterError::Dispatch(DispatchError::AlreadyClaimed {
                id: dispatch.dispatch_id,
            });
        }
        MusterError::Dispatch(DispatchError::InvalidTransition {
            id: dispatch.dispatch_id,
            from: dispatch.status.to_string(),
            to: to.to_string(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::{EventConfig, EventStatus};
    use muster_test_utils::{storage_with_agents, MemoryStorage};

    fn queue() -> (Arc<MemoryStorage>, DispatchQueue) {
        let storage = Arc::new(storage_with_agents(&["sam", "leo"]));
        let alerts = AlertEngine::new(storage.clone());
        let bus = EventBus::new(storage.clone(), EventConfig::default());
        let queue = DispatchQueue::new(storage.clone(), DispatchConfig::default(), alerts, bus);
        (storage, queue)
    }

    fn request(agent: &str, priority: DispatchPriority) -> NewDispatch {
        NewDispatch {
            agent_name: agent.to_string(),
            command: "triage-inbox".to_string(),
            payload: None,
            priority,
            max_retries: None,
        }
    }

    #[test]
    fn test_create_rejects_unknown_agent() {
        let (_, queue) = queue();
        let result = queue.create(Utc::now(), request("ghost", DispatchPriority::Normal));
        assert!(matches!(
            result,
            Err(MusterError::Agent(AgentError::NotRegistered { .. }))
        ));
    }

    #[test]
    fn test_create_rejects_empty_command() {
        let (_, queue) = queue();
        let mut req = request("sam", DispatchPriority::Normal);
        req.command = "   ".to_string();
        assert!(matches!(
            queue.create(Utc::now(), req),
            Err(MusterError::Validation(_))
        ));
    }

    #[test]
    fn test_create_publishes_dispatch_event() {
        let (storage, queue) = queue();
        let now = Utc::now();
        let dispatch = queue
            .create(now, request("sam", DispatchPriority::High))
            .unwrap();

        let events = storage.event_list_for_target("sam", None, now).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Pending);
        match &events[0].payload {
            EventPayload::Dispatch { dispatch_id, .. } => {
                assert_eq!(*dispatch_id, dispatch.dispatch_id)
            }
            other => panic!("expected dispatch payload, got {other:?}"),
        }
    }

    #[test]
    fn test_next_serves_urgent_before_older_normal() {
        let (_, queue) = queue();
        let now = Utc::now();
        queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();
        let urgent = queue
            .create(now + Duration::seconds(1), request("sam", DispatchPriority::Urgent))
            .unwrap();

        let next = queue.next(now + Duration::seconds(2), "sam").unwrap();
        assert_eq!(next.map(|d| d.dispatch_id), Some(urgent.dispatch_id));
    }

    #[test]
    fn test_next_hides_dispatches_inside_backoff() {
        let (_, queue) = queue();
        let now = Utc::now();
        let d = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();
        queue.claim(now, d.dispatch_id).unwrap();
        let (_, retry) = queue.fail(now, d.dispatch_id, "boom").unwrap();
        let retry = retry.unwrap();

        // Still inside the 1-minute backoff.
        assert!(queue.next(now + Duration::seconds(30), "sam").unwrap().is_none());
        // Past it.
        let next = queue.next(now + Duration::seconds(61), "sam").unwrap();
        assert_eq!(next.map(|d| d.dispatch_id), Some(retry.dispatch_id));
    }

    #[test]
    fn test_next_returns_none_for_tripped_agent() {
        let (storage, queue) = queue();
        let now = Utc::now();
        queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();

        let agent = storage.agent_get_by_name("sam").unwrap().unwrap();
        storage
            .agent_update(
                agent.agent_id,
                agent.version,
                muster_storage::AgentUpdate {
                    circuit: Some(muster_core::CircuitState::trip(
                        now,
                        muster_core::BackoffLevel::L0,
                    )),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(queue.next(now, "sam").unwrap().is_none());
    }

    #[test]
    fn test_next_any_skips_tripped_agents() {
        let (storage, queue) = queue();
        let now = Utc::now();
        queue
            .create(now, request("sam", DispatchPriority::Urgent))
            .unwrap();
        let for_leo = queue
            .create(now, request("leo", DispatchPriority::Normal))
            .unwrap();

        let agent = storage.agent_get_by_name("sam").unwrap().unwrap();
        storage
            .agent_update(
                agent.agent_id,
                agent.version,
                muster_storage::AgentUpdate {
                    circuit: Some(muster_core::CircuitState::trip(
                        now,
                        muster_core::BackoffLevel::L0,
                    )),
                    ..Default::default()
                },
            )
            .unwrap();

        // Sam's urgent dispatch sorts first but sam's breaker is open.
        let next = queue.next_any(now).unwrap().unwrap();
        assert_eq!(next.dispatch_id, for_leo.dispatch_id);
    }

    #[test]
    fn test_claim_race_admits_exactly_one() {
        let (_, queue) = queue();
        let now = Utc::now();
        let d = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();

        let winner = queue.claim(now, d.dispatch_id).unwrap();
        assert_eq!(winner.status, DispatchStatus::Running);
        assert!(winner.started_at.is_some());

        let loser = queue.claim(now, d.dispatch_id);
        assert!(matches!(
            loser,
            Err(MusterError::Dispatch(DispatchError::AlreadyClaimed { .. }))
        ));
    }

    #[test]
    fn test_complete_requires_running() {
        let (_, queue) = queue();
        let now = Utc::now();
        let d = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();

        assert!(matches!(
            queue.complete(now, d.dispatch_id, None),
            Err(MusterError::Dispatch(DispatchError::InvalidTransition { .. }))
        ));

        queue.claim(now, d.dispatch_id).unwrap();
        let done = queue
            .complete(now, d.dispatch_id, Some(serde_json::json!({"ok": true})))
            .unwrap();
        assert_eq!(done.status, DispatchStatus::Completed);
        assert!(done.completed_at.is_some());

        // Terminal states reject further transitions.
        assert!(queue.claim(now, d.dispatch_id).is_err());
        assert!(queue.fail(now, d.dispatch_id, "late").is_err());
    }

    #[test]
    fn test_fail_schedules_backoff_chain_to_root() {
        let (_, queue) = queue();
        let now = Utc::now();
        let root = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();

        queue.claim(now, root.dispatch_id).unwrap();
        let (_, first_retry) = queue.fail(now, root.dispatch_id, "boom").unwrap();
        let first_retry = first_retry.unwrap();
        assert_eq!(first_retry.retry_count, 1);
        assert_eq!(first_retry.original_dispatch_id, Some(root.dispatch_id));
        assert_eq!(
            first_retry.next_retry_at,
            Some(now + Duration::seconds(60))
        );

        let later = now + Duration::minutes(2);
        queue.claim(later, first_retry.dispatch_id).unwrap();
        let (_, second_retry) = queue.fail(later, first_retry.dispatch_id, "boom").unwrap();
        let second_retry = second_retry.unwrap();
        assert_eq!(second_retry.retry_count, 2);
        // Chain still points at the root, not the intermediate clone.
        assert_eq!(second_retry.original_dispatch_id, Some(root.dispatch_id));
        assert_eq!(
            second_retry.next_retry_at,
            Some(later + Duration::seconds(300))
        );
    }

    #[test]
    fn test_exhausted_retries_raise_agent_failed_alert() {
        let (storage, queue) = queue();
        let mut now = Utc::now();
        let mut current = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();

        // Burn through the full retry budget.
        for _ in 0..3 {
            now += Duration::minutes(20);
            queue.claim(now, current.dispatch_id).unwrap();
            let (_, retry) = queue.fail(now, current.dispatch_id, "boom").unwrap();
            current = retry.unwrap();
        }

        now += Duration::minutes(20);
        queue.claim(now, current.dispatch_id).unwrap();
        let (failed, retry) = queue.fail(now, current.dispatch_id, "boom").unwrap();
        assert!(retry.is_none());
        assert_eq!(failed.retry_count, 3);

        let alert = storage
            .alert_find_open(None, "sam", AlertType::AgentFailed)
            .unwrap();
        assert!(alert.is_some());
        assert_eq!(alert.unwrap().severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_interrupt_skips_retry() {
        let (_, queue) = queue();
        let now = Utc::now();
        let d = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();
        queue.claim(now, d.dispatch_id).unwrap();

        let stopped = queue.interrupt(now, d.dispatch_id, "operator abort").unwrap();
        assert_eq!(stopped.status, DispatchStatus::Failed);

        // No retry clone appeared.
        assert!(queue.next(now + Duration::hours(1), "sam").unwrap().is_none());
    }

    #[test]
    fn test_reset_agent_clears_live_dispatches_only() {
        let (_, queue) = queue();
        let now = Utc::now();
        let a = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();
        queue.claim(now, a.dispatch_id).unwrap();
        queue.complete(now, a.dispatch_id, None).unwrap();

        let b = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();
        queue.claim(now, b.dispatch_id).unwrap();
        queue
            .create(now, request("sam", DispatchPriority::Low))
            .unwrap();
        queue
            .create(now, request("leo", DispatchPriority::Normal))
            .unwrap();

        let cleared = queue.reset_agent(now, "sam").unwrap();
        assert_eq!(cleared, 2);
        assert!(queue.next(now + Duration::hours(1), "sam").unwrap().is_none());
        assert!(queue.next(now, "leo").unwrap().is_some());
    }

    #[test]
    fn test_cleanup_stuck_fails_and_retries_old_running() {
        let (_, queue) = queue();
        let now = Utc::now();
        let stuck = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();
        queue.claim(now, stuck.dispatch_id).unwrap();

        let fresh = queue
            .create(now, request("sam", DispatchPriority::Normal))
            .unwrap();
        queue
            .claim(now + Duration::minutes(25), fresh.dispatch_id)
            .unwrap();

        let outcome = queue.cleanup_stuck(now + Duration::minutes(31)).unwrap();
        assert_eq!(outcome.examined, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.retried, 1);

        let stuck_after = queue.get(stuck.dispatch_id).unwrap().unwrap();
        assert_eq!(stuck_after.status, DispatchStatus::Failed);
        let fresh_after = queue.get(fresh.dispatch_id).unwrap().unwrap();
        assert_eq!(fresh_after.status, DispatchStatus::Running);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
