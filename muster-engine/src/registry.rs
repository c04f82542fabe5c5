//! Agent Registry
//!
//! Registration, lookup, status changes, and retirement. Names are the unit
//! of addressing everywhere else, so they are unique and never reused while
//! an agent is live; retirement soft-deletes, and re-registering a retired
//! name revives the record with its history intact.

use chrono::{DateTime, Utc};
use muster_core::{
    new_entity_id, ActivityEntry, ActivityKind, Agent, AgentError, AgentHealth, AgentStatus,
    CircuitState, HeartbeatConfig, MusterError, MusterResult, ValidationError,
};
use muster_storage::{AgentUpdate, StorageTrait};
use std::sync::Arc;
use tracing::info;

/// Agent registration and lifecycle.
#[derive(Clone)]
pub struct AgentRegistry {
    storage: Arc<dyn StorageTrait>,
    heartbeat: HeartbeatConfig,
}

impl AgentRegistry {
    pub fn new(storage: Arc<dyn StorageTrait>, heartbeat: HeartbeatConfig) -> Self {
        Self { storage, heartbeat }
    }

    /// Register a new agent, assigning it a staggered heartbeat slot.
    ///
    /// Re-registering a retired name revives that agent; re-registering a
    /// live name is a conflict.
    pub fn register(&self, now: DateTime<Utc>, name: &str, role: &str) -> MusterResult<Agent> {
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(MusterError::Validation(ValidationError {
                field: "name".to_string(),
                reason: "must be a non-empty single token".to_string(),
            }));
        }

        if let Some(existing) = self.storage.agent_get_by_name(name)? {
            if !existing.retired {
                return Err(MusterError::Agent(AgentError::AlreadyRegistered {
                    name: name.to_string(),
                }));
            }
            let revived = self.storage.agent_update(
                existing.agent_id,
                existing.version,
                AgentUpdate {
                    retired: Some(false),
                    status: Some(AgentStatus::Offline),
                    status_reason: Some(Some("re-registered".to_string())),
                    status_since: Some(now),
                    circuit: Some(CircuitState::Closed),
                    health: Some(AgentHealth::default()),
                    ..Default::default()
                },
            )?;
            info!(agent = name, "retired agent revived");
            return Ok(revived);
        }

        let index = self.storage.agent_list(true)?.len() as u32;
        let slot =
            (index * self.heartbeat.slot_stride_minutes) % crate::heartbeat::SLOT_PERIOD_MINUTES;
        let agent = Agent {
            agent_id: new_entity_id(),
            name: name.to_string(),
            role: role.to_string(),
            status: AgentStatus::Offline,
            status_reason: None,
            status_since: now,
            last_heartbeat: None,
            last_seen: None,
            circuit: CircuitState::Closed,
            health: AgentHealth::default(),
            working_context: None,
            heartbeat_slot: slot,
            retired: false,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        self.storage.agent_insert(&agent)?;
        info!(agent = name, role = role, slot, "agent registered");
        Ok(agent)
    }

    /// Look up a live agent by name.
    pub fn get(&self, name: &str) -> MusterResult<Option<Agent>> {
        Ok(self.storage.agent_get_by_name(name)?.filter(|a| !a.retired))
    }

    /// List agents, optionally including retired ones.
    pub fn list(&self, include_retired: bool) -> MusterResult<Vec<Agent>> {
        self.storage.agent_list(include_retired)
    }

    /// Change an agent's availability and record it in the activity feed.
    pub fn set_status(
        &self,
        now: DateTime<Utc>,
        name: &str,
        status: AgentStatus,
        reason: Option<String>,
    ) -> MusterResult<Agent> {
        let agent = self.require(name)?;
        let updated = self.storage.agent_update(
            agent.agent_id,
            agent.version,
            AgentUpdate {
                status: Some(status),
                status_reason: Some(reason.clone()),
                status_since: Some(now),
                last_seen: Some(now),
                ..Default::default()
            },
        )?;
        self.storage.activity_insert(&ActivityEntry {
            activity_id: new_entity_id(),
            agent_name: name.to_string(),
            kind: ActivityKind::StatusChange,
            body: match reason {
                Some(reason) => format!("{status}: {reason}"),
                None => status.to_string(),
            },
            created_at: now,
        })?;
        Ok(updated)
    }

    /// Recent activity feed entries, newest first, optionally for one agent.
    pub fn activity(
        &self,
        agent: Option<&str>,
        limit: usize,
    ) -> MusterResult<Vec<ActivityEntry>> {
        self.storage.activity_list(agent, limit)
    }

    /// Soft-delete an agent. Its history stays addressable but it leaves
    /// routing, listings, and the heartbeat sweep.
    pub fn retire(&self, now: DateTime<Utc>, name: &str) -> MusterResult<Agent> {
        let agent = self.require(name)?;
        let retired = self.storage.agent_update(
            agent.agent_id,
            agent.version,
            AgentUpdate {
                retired: Some(true),
                status: Some(AgentStatus::Offline),
                status_reason: Some(Some("retired".to_string())),
                status_since: Some(now),
                ..Default::default()
            },
        )?;
        info!(agent = name, "agent retired");
        Ok(retired)
    }

    fn require(&self, name: &str) -> MusterResult<Agent> {
        self.get(name)?.ok_or_else(|| {
            MusterError::Agent(AgentError::NotRegistered {
                name: name.to_string(),
            })
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
