//! MUSTER Storage - Storage Trait and In-Memory Implementation
//!
//! Defines the storage abstraction layer for MUSTER entities. Every mutating
//! operation takes the caller's expected record version; a mismatch returns
//! `VersionConflict`, which is how claim exclusivity and lost-update
//! protection are enforced without holding locks across operations.

use muster_core::{
    ActivityEntry, Agent, AgentEvent, AgentHealth, AgentStatus, AlertDelivery, AlertPreferences,
    AlertSeverity, AlertStatus, AlertType, CircuitState, Dispatch, DispatchStatus, EntityType,
    EventStatus, LoopAlert, LoopMessage, LoopStage, MusterError, MusterResult, StorageError,
    Timestamp,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for agents.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    /// New availability status
    pub status: Option<AgentStatus>,
    /// Reason for the status, `Some(None)` clears it
    pub status_reason: Option<Option<String>>,
    /// When the status took effect
    pub status_since: Option<Timestamp>,
    /// Last accepted heartbeat
    pub last_heartbeat: Option<Timestamp>,
    /// Last observed activity of any kind
    pub last_seen: Option<Timestamp>,
    /// New circuit breaker state
    pub circuit: Option<CircuitState>,
    /// Replacement health counters
    pub health: Option<AgentHealth>,
    /// Self-reported working context, `Some(None)` clears it
    pub working_context: Option<Option<String>>,
    /// Soft-delete flag
    pub retired: Option<bool>,
}

/// Update payload for dispatches.
#[derive(Debug, Clone, Default)]
pub struct DispatchUpdate {
    /// New lifecycle status
    pub status: Option<DispatchStatus>,
    /// Completion result
    pub result: Option<serde_json::Value>,
    /// Failure description
    pub error: Option<String>,
    /// When execution began
    pub started_at: Option<Timestamp>,
    /// When a terminal status was reached
    pub completed_at: Option<Timestamp>,
}

/// Update payload for messages.
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    /// New loop stage
    pub stage: Option<LoopStage>,
    pub delivered_at: Option<Timestamp>,
    pub seen_at: Option<Timestamp>,
    pub replied_at: Option<Timestamp>,
    pub acted_at: Option<Timestamp>,
    pub reported_at: Option<Timestamp>,
    pub expected_reply_by: Option<Timestamp>,
    pub expected_action_by: Option<Timestamp>,
    pub expected_report_by: Option<Timestamp>,
    /// Mark the loop as abandoned
    pub loop_broken: Option<bool>,
    pub loop_broken_reason: Option<String>,
}

/// Update payload for alerts.
#[derive(Debug, Clone, Default)]
pub struct AlertUpdate {
    /// New lifecycle status
    pub status: Option<AlertStatus>,
    /// Severity bump on escalation
    pub severity: Option<AlertSeverity>,
    /// Supervisor the alert was escalated to
    pub escalated_to: Option<String>,
    pub acknowledged: Option<bool>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<Timestamp>,
    pub resolved_at: Option<Timestamp>,
}

/// Update payload for events.
#[derive(Debug, Clone, Default)]
pub struct EventUpdate {
    /// New delivery status
    pub status: Option<EventStatus>,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for MUSTER entities.
///
/// All `*_update` methods are compare-and-swap: the caller passes the version
/// it read, and the update only commits when the stored version still
/// matches. The committed record (with its bumped version) is returned.
pub trait StorageTrait: Send + Sync {
    // === Agent Operations ===

    /// Insert a new agent. Fails when the id or name is already taken.
    fn agent_insert(&self, a: &Agent) -> MusterResult<()>;

    /// Get an agent by ID.
    fn agent_get(&self, id: Uuid) -> MusterResult<Option<Agent>>;

    /// Get an agent by its unique name.
    fn agent_get_by_name(&self, name: &str) -> MusterResult<Option<Agent>>;

    /// Update an agent, checking the expected version.
    fn agent_update(&self, id: Uuid, expected_version: i64, update: AgentUpdate)
        -> MusterResult<Agent>;

    /// List agents, optionally including retired ones, ordered by name.
    fn agent_list(&self, include_retired: bool) -> MusterResult<Vec<Agent>>;

    // === Dispatch Operations ===

    /// Insert a new dispatch.
    fn dispatch_insert(&self, d: &Dispatch) -> MusterResult<()>;

    /// Get a dispatch by ID.
    fn dispatch_get(&self, id: Uuid) -> MusterResult<Option<Dispatch>>;

    /// Update a dispatch, checking the expected version.
    fn dispatch_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: DispatchUpdate,
    ) -> MusterResult<Dispatch>;

    /// List pending dispatches in claim order: urgent first, then priority
    /// rank, then arrival order. Optionally scoped to one agent.
    fn dispatch_pending_ordered(&self, agent: Option<&str>) -> MusterResult<Vec<Dispatch>>;

    /// List all dispatches addressed to an agent, newest first.
    fn dispatch_list_by_agent(&self, agent: &str) -> MusterResult<Vec<Dispatch>>;

    /// List running dispatches, for the stuck-dispatch sweep.
    fn dispatch_list_running(&self) -> MusterResult<Vec<Dispatch>>;

    // === Message Operations ===

    /// Insert a new message.
    fn message_insert(&self, m: &LoopMessage) -> MusterResult<()>;

    /// Get a message by ID.
    fn message_get(&self, id: Uuid) -> MusterResult<Option<LoopMessage>>;

    /// Update a message, checking the expected version.
    fn message_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: MessageUpdate,
    ) -> MusterResult<LoopMessage>;

    /// List messages addressed to a recipient, oldest first.
    fn message_list_by_recipient(&self, recipient: &str) -> MusterResult<Vec<LoopMessage>>;

    /// List messages whose loop is still open (not reported, not broken).
    fn message_list_open(&self) -> MusterResult<Vec<LoopMessage>>;

    // === Alert Operations ===

    /// Insert a new alert.
    fn alert_insert(&self, a: &LoopAlert) -> MusterResult<()>;

    /// Get an alert by ID.
    fn alert_get(&self, id: Uuid) -> MusterResult<Option<LoopAlert>>;

    /// Update an alert, checking the expected version.
    fn alert_update(&self, id: Uuid, expected_version: i64, update: AlertUpdate)
        -> MusterResult<LoopAlert>;

    /// Find an open alert matching the dedup key (message, agent, type).
    fn alert_find_open(
        &self,
        message_id: Option<Uuid>,
        agent: &str,
        alert_type: AlertType,
    ) -> MusterResult<Option<LoopAlert>>;

    /// List open alerts for a message.
    fn alert_list_open_for_message(&self, message_id: Uuid) -> MusterResult<Vec<LoopAlert>>;

    /// List alerts, optionally filtered by status, newest first.
    fn alert_list(&self, status: Option<AlertStatus>) -> MusterResult<Vec<LoopAlert>>;

    // === Event Operations ===

    /// Insert a new event.
    fn event_insert(&self, e: &AgentEvent) -> MusterResult<()>;

    /// Get an event by ID.
    fn event_get(&self, id: Uuid) -> MusterResult<Option<AgentEvent>>;

    /// Update an event, checking the expected version.
    fn event_update(&self, id: Uuid, expected_version: i64, update: EventUpdate)
        -> MusterResult<AgentEvent>;

    /// List pending, non-expired events for a target agent, oldest first.
    /// `since` filters to events created strictly after that time.
    fn event_list_for_target(
        &self,
        target: &str,
        since: Option<Timestamp>,
        now: Timestamp,
    ) -> MusterResult<Vec<AgentEvent>>;

    /// List pending events whose TTL has lapsed, for the expiry sweep.
    fn event_list_lapsed(&self, now: Timestamp) -> MusterResult<Vec<AgentEvent>>;

    // === Activity Operations ===

    /// Append an activity feed entry.
    fn activity_insert(&self, a: &ActivityEntry) -> MusterResult<()>;

    /// List feed entries, newest first, optionally scoped to one agent.
    fn activity_list(&self, agent: Option<&str>, limit: usize) -> MusterResult<Vec<ActivityEntry>>;

    // === Alert Preference Operations ===

    /// Insert or replace delivery preferences for a target.
    fn preferences_upsert(&self, p: &AlertPreferences) -> MusterResult<()>;

    /// Get delivery preferences for a target.
    fn preferences_get(&self, target: &str) -> MusterResult<Option<AlertPreferences>>;

    // === Alert Delivery Operations ===

    /// Record a delivery attempt.
    fn delivery_insert(&self, d: &AlertDelivery) -> MusterResult<()>;

    /// List delivery attempts for an alert, oldest first.
    fn delivery_list_for_alert(&self, alert_id: Uuid) -> MusterResult<Vec<AlertDelivery>>;
}

// ============================================================================
// IN-MEMORY STORAGE
// ============================================================================

type Table<T> = Arc<RwLock<HashMap<Uuid, T>>>;

/// In-memory storage backed by per-entity hash maps.
///
/// Used both as the test double and as the runtime store for single-node
/// deployments.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    agents: Table<Agent>,
    dispatches: Table<Dispatch>,
    messages: Table<LoopMessage>,
    alerts: Table<LoopAlert>,
    events: Table<AgentEvent>,
    activity: Table<ActivityEntry>,
    preferences: Arc<RwLock<HashMap<String, AlertPreferences>>>,
    deliveries: Table<AlertDelivery>,
}

fn read_table<T>(table: &RwLock<T>) -> MusterResult<RwLockReadGuard<'_, T>> {
    table
        .read()
        .map_err(|_| MusterError::Storage(StorageError::LockPoisoned))
}

fn write_table<T>(table: &RwLock<T>) -> MusterResult<RwLockWriteGuard<'_, T>> {
    table
        .write()
        .map_err(|_| MusterError::Storage(StorageError::LockPoisoned))
}

fn check_version(
    entity_type: EntityType,
    id: Uuid,
    expected: i64,
    actual: i64,
) -> MusterResult<()> {
    if expected != actual {
        return Err(MusterError::Storage(StorageError::VersionConflict {
            entity_type,
            id,
            expected,
            actual,
        }));
    }
    Ok(())
}

impl MemoryStorage {
    /// Create a new empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get count of stored agents.
    pub fn agent_count(&self) -> usize {
        self.agents.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Get count of stored dispatches.
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Get count of stored messages.
    pub fn message_count(&self) -> usize {
        self.messages.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Get count of stored alerts.
    pub fn alert_count(&self) -> usize {
        self.alerts.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Get count of stored events.
    pub fn event_count(&self) -> usize {
        self.events.read().map(|t| t.len()).unwrap_or(0)
    }
}

impl StorageTrait for MemoryStorage {
    // === Agent Operations ===

    fn agent_insert(&self, a: &Agent) -> MusterResult<()> {
        let mut agents = write_table(&self.agents)?;
        if agents.contains_key(&a.agent_id) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Agent,
                reason: "already exists".to_string(),
            }));
        }
        if agents.values().any(|existing| existing.name == a.name) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Agent,
                reason: format!("name taken: {}", a.name),
            }));
        }
        agents.insert(a.agent_id, a.clone());
        Ok(())
    }

    fn agent_get(&self, id: Uuid) -> MusterResult<Option<Agent>> {
        let agents = read_table(&self.agents)?;
        Ok(agents.get(&id).cloned())
    }

    fn agent_get_by_name(&self, name: &str) -> MusterResult<Option<Agent>> {
        let agents = read_table(&self.agents)?;
        Ok(agents.values().find(|a| a.name == name).cloned())
    }

    fn agent_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: AgentUpdate,
    ) -> MusterResult<Agent> {
        let mut agents = write_table(&self.agents)?;
        let agent = agents
            .get_mut(&id)
            .ok_or(MusterError::not_found(EntityType::Agent, id))?;
        check_version(EntityType::Agent, id, expected_version, agent.version)?;

        if let Some(status) = update.status {
            agent.status = status;
        }
        if let Some(status_reason) = update.status_reason {
            agent.status_reason = status_reason;
        }
        if let Some(status_since) = update.status_since {
            agent.status_since = status_since;
        }
        if let Some(last_heartbeat) = update.last_heartbeat {
            agent.last_heartbeat = Some(last_heartbeat);
        }
        if let Some(last_seen) = update.last_seen {
            agent.last_seen = Some(last_seen);
        }
        if let Some(circuit) = update.circuit {
            agent.circuit = circuit;
        }
        if let Some(health) = update.health {
            agent.health = health;
        }
        if let Some(working_context) = update.working_context {
            agent.working_context = working_context;
        }
        if let Some(retired) = update.retired {
            agent.retired = retired;
        }
        agent.updated_at = chrono::Utc::now();
        agent.version += 1;

        Ok(agent.clone())
    }

    fn agent_list(&self, include_retired: bool) -> MusterResult<Vec<Agent>> {
        let agents = read_table(&self.agents)?;
        let mut list: Vec<Agent> = agents
            .values()
            .filter(|a| include_retired || !a.retired)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    // === Dispatch Operations ===

    fn dispatch_insert(&self, d: &Dispatch) -> MusterResult<()> {
        let mut dispatches = write_table(&self.dispatches)?;
        if dispatches.contains_key(&d.dispatch_id) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Dispatch,
                reason: "already exists".to_string(),
            }));
        }
        dispatches.insert(d.dispatch_id, d.clone());
        Ok(())
    }

    fn dispatch_get(&self, id: Uuid) -> MusterResult<Option<Dispatch>> {
        let dispatches = read_table(&self.dispatches)?;
        Ok(dispatches.get(&id).cloned())
    }

    fn dispatch_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: DispatchUpdate,
    ) -> MusterResult<Dispatch> {
        let mut dispatches = write_table(&self.dispatches)?;
        let dispatch = dispatches
            .get_mut(&id)
            .ok_or(MusterError::not_found(EntityType::Dispatch, id))?;
        check_version(EntityType::Dispatch, id, expected_version, dispatch.version)?;

        if let Some(status) = update.status {
            dispatch.status = status;
        }
        if let Some(result) = update.result {
            dispatch.result = Some(result);
        }
        if let Some(error) = update.error {
            dispatch.error = Some(error);
        }
        if let Some(started_at) = update.started_at {
            dispatch.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            dispatch.completed_at = Some(completed_at);
        }
        dispatch.version += 1;

        Ok(dispatch.clone())
    }

    fn dispatch_pending_ordered(&self, agent: Option<&str>) -> MusterResult<Vec<Dispatch>> {
        let dispatches = read_table(&self.dispatches)?;
        let mut pending: Vec<Dispatch> = dispatches
            .values()
            .filter(|d| d.status == DispatchStatus::Pending)
            .filter(|d| agent.map(|name| d.agent_name == name).unwrap_or(true))
            .cloned()
            .collect();
        // Urgent ahead of everything, then priority rank, then arrival order.
        pending.sort_by(|a, b| {
            b.is_urgent
                .cmp(&a.is_urgent)
                .then(a.priority.cmp(&b.priority))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(pending)
    }

    fn dispatch_list_by_agent(&self, agent: &str) -> MusterResult<Vec<Dispatch>> {
        let dispatches = read_table(&self.dispatches)?;
        let mut list: Vec<Dispatch> = dispatches
            .values()
            .filter(|d| d.agent_name == agent)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    fn dispatch_list_running(&self) -> MusterResult<Vec<Dispatch>> {
        let dispatches = read_table(&self.dispatches)?;
        Ok(dispatches
            .values()
            .filter(|d| d.status == DispatchStatus::Running)
            .cloned()
            .collect())
    }

    // === Message Operations ===

    fn message_insert(&self, m: &LoopMessage) -> MusterResult<()> {
        let mut messages = write_table(&self.messages)?;
        if messages.contains_key(&m.message_id) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Message,
                reason: "already exists".to_string(),
            }));
        }
        messages.insert(m.message_id, m.clone());
        Ok(())
    }

    fn message_get(&self, id: Uuid) -> MusterResult<Option<LoopMessage>> {
        let messages = read_table(&self.messages)?;
        Ok(messages.get(&id).cloned())
    }

    fn message_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: MessageUpdate,
    ) -> MusterResult<LoopMessage> {
        let mut messages = write_table(&self.messages)?;
        let message = messages
            .get_mut(&id)
            .ok_or(MusterError::not_found(EntityType::Message, id))?;
        check_version(EntityType::Message, id, expected_version, message.version)?;

        if let Some(stage) = update.stage {
            message.stage = stage;
        }
        if let Some(at) = update.delivered_at {
            message.delivered_at = Some(at);
        }
        if let Some(at) = update.seen_at {
            message.seen_at = Some(at);
        }
        if let Some(at) = update.replied_at {
            message.replied_at = Some(at);
        }
        if let Some(at) = update.acted_at {
            message.acted_at = Some(at);
        }
        if let Some(at) = update.reported_at {
            message.reported_at = Some(at);
        }
        if let Some(by) = update.expected_reply_by {
            message.expected_reply_by = Some(by);
        }
        if let Some(by) = update.expected_action_by {
            message.expected_action_by = Some(by);
        }
        if let Some(by) = update.expected_report_by {
            message.expected_report_by = Some(by);
        }
        if let Some(loop_broken) = update.loop_broken {
            message.loop_broken = loop_broken;
        }
        if let Some(reason) = update.loop_broken_reason {
            message.loop_broken_reason = Some(reason);
        }
        message.version += 1;

        Ok(message.clone())
    }

    fn message_list_by_recipient(&self, recipient: &str) -> MusterResult<Vec<LoopMessage>> {
        let messages = read_table(&self.messages)?;
        let mut list: Vec<LoopMessage> = messages
            .values()
            .filter(|m| m.to_agent == recipient)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    fn message_list_open(&self) -> MusterResult<Vec<LoopMessage>> {
        let messages = read_table(&self.messages)?;
        Ok(messages
            .values()
            .filter(|m| m.is_sla_tracked())
            .cloned()
            .collect())
    }

    // === Alert Operations ===

    fn alert_insert(&self, a: &LoopAlert) -> MusterResult<()> {
        let mut alerts = write_table(&self.alerts)?;
        if alerts.contains_key(&a.alert_id) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Alert,
                reason: "already exists".to_string(),
            }));
        }
        alerts.insert(a.alert_id, a.clone());
        Ok(())
    }

    fn alert_get(&self, id: Uuid) -> MusterResult<Option<LoopAlert>> {
        let alerts = read_table(&self.alerts)?;
        Ok(alerts.get(&id).cloned())
    }

    fn alert_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: AlertUpdate,
    ) -> MusterResult<LoopAlert> {
        let mut alerts = write_table(&self.alerts)?;
        let alert = alerts
            .get_mut(&id)
            .ok_or(MusterError::not_found(EntityType::Alert, id))?;
        check_version(EntityType::Alert, id, expected_version, alert.version)?;

        if let Some(status) = update.status {
            alert.status = status;
        }
        if let Some(severity) = update.severity {
            alert.severity = severity;
        }
        if let Some(escalated_to) = update.escalated_to {
            alert.escalated_to = Some(escalated_to);
        }
        if let Some(acknowledged) = update.acknowledged {
            alert.acknowledged = acknowledged;
        }
        if let Some(by) = update.acknowledged_by {
            alert.acknowledged_by = Some(by);
        }
        if let Some(at) = update.acknowledged_at {
            alert.acknowledged_at = Some(at);
        }
        if let Some(at) = update.resolved_at {
            alert.resolved_at = Some(at);
        }
        alert.version += 1;

        Ok(alert.clone())
    }

    fn alert_find_open(
        &self,
        message_id: Option<Uuid>,
        agent: &str,
        alert_type: AlertType,
    ) -> MusterResult<Option<LoopAlert>> {
        let alerts = read_table(&self.alerts)?;
        Ok(alerts
            .values()
            .find(|a| {
                a.is_open()
                    && a.message_id == message_id
                    && a.agent_name == agent
                    && a.alert_type == alert_type
            })
            .cloned())
    }

    fn alert_list_open_for_message(&self, message_id: Uuid) -> MusterResult<Vec<LoopAlert>> {
        let alerts = read_table(&self.alerts)?;
        Ok(alerts
            .values()
            .filter(|a| a.is_open() && a.message_id == Some(message_id))
            .cloned()
            .collect())
    }

    fn alert_list(&self, status: Option<AlertStatus>) -> MusterResult<Vec<LoopAlert>> {
        let alerts = read_table(&self.alerts)?;
        let mut list: Vec<LoopAlert> = alerts
            .values()
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    // === Event Operations ===

    fn event_insert(&self, e: &AgentEvent) -> MusterResult<()> {
        let mut events = write_table(&self.events)?;
        if events.contains_key(&e.event_id) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Event,
                reason: "already exists".to_string(),
            }));
        }
        events.insert(e.event_id, e.clone());
        Ok(())
    }

    fn event_get(&self, id: Uuid) -> MusterResult<Option<AgentEvent>> {
        let events = read_table(&self.events)?;
        Ok(events.get(&id).cloned())
    }

    fn event_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: EventUpdate,
    ) -> MusterResult<AgentEvent> {
        let mut events = write_table(&self.events)?;
        let event = events
            .get_mut(&id)
            .ok_or(MusterError::not_found(EntityType::Event, id))?;
        check_version(EntityType::Event, id, expected_version, event.version)?;

        if let Some(status) = update.status {
            event.status = status;
        }
        event.version += 1;

        Ok(event.clone())
    }

    fn event_list_for_target(
        &self,
        target: &str,
        since: Option<Timestamp>,
        now: Timestamp,
    ) -> MusterResult<Vec<AgentEvent>> {
        let events = read_table(&self.events)?;
        let mut list: Vec<AgentEvent> = events
            .values()
            .filter(|e| e.target_agent == target && e.is_deliverable(now))
            .filter(|e| since.map(|s| e.created_at > s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    fn event_list_lapsed(&self, now: Timestamp) -> MusterResult<Vec<AgentEvent>> {
        let events = read_table(&self.events)?;
        Ok(events
            .values()
            .filter(|e| e.status == EventStatus::Pending && e.expires_at <= now)
            .cloned()
            .collect())
    }

    // === Activity Operations ===

    fn activity_insert(&self, a: &ActivityEntry) -> MusterResult<()> {
        let mut activity = write_table(&self.activity)?;
        if activity.contains_key(&a.activity_id) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Activity,
                reason: "already exists".to_string(),
            }));
        }
        activity.insert(a.activity_id, a.clone());
        Ok(())
    }

    fn activity_list(&self, agent: Option<&str>, limit: usize) -> MusterResult<Vec<ActivityEntry>> {
        let activity = read_table(&self.activity)?;
        let mut list: Vec<ActivityEntry> = activity
            .values()
            .filter(|a| agent.map(|name| a.agent_name == name).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit);
        Ok(list)
    }

    // === Alert Preference Operations ===

    fn preferences_upsert(&self, p: &AlertPreferences) -> MusterResult<()> {
        let mut preferences = write_table(&self.preferences)?;
        preferences.insert(p.target.clone(), p.clone());
        Ok(())
    }

    fn preferences_get(&self, target: &str) -> MusterResult<Option<AlertPreferences>> {
        let preferences = read_table(&self.preferences)?;
        Ok(preferences.get(target).cloned())
    }

    // === Alert Delivery Operations ===

    fn delivery_insert(&self, d: &AlertDelivery) -> MusterResult<()> {
        let mut deliveries = write_table(&self.deliveries)?;
        if deliveries.contains_key(&d.delivery_id) {
            return Err(MusterError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Delivery,
                reason: "already exists".to_string(),
            }));
        }
        deliveries.insert(d.delivery_id, d.clone());
        Ok(())
    }

    fn delivery_list_for_alert(&self, alert_id: Uuid) -> MusterResult<Vec<AlertDelivery>> {
        let deliveries = read_table(&self.deliveries)?;
        let mut list: Vec<AlertDelivery> = deliveries
            .values()
            .filter(|d| d.alert_id == alert_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Utc;
    use muster_core::{AgentHealth, DispatchPriority};
    use proptest::prelude::*;

    fn make_agent(name: String) -> Agent {
        let now = Utc::now();
        Agent {
            agent_id: Uuid::now_v7(),
            name,
            role: "backend".to_string(),
            status: AgentStatus::Online,
            status_reason: None,
            status_since: now,
            last_heartbeat: None,
            last_seen: None,
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

    fn make_dispatch(priority: DispatchPriority, offset_secs: i64) -> Dispatch {
        Dispatch {
            dispatch_id: Uuid::now_v7(),
            agent_name: "sam".to_string(),
            command: "run".to_string(),
            payload: None,
            status: DispatchStatus::Pending,
            priority,
            is_urgent: priority == DispatchPriority::Urgent,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            original_dispatch_id: None,
            result: None,
            error: None,
            created_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            started_at: None,
            completed_at: None,
            version: 1,
        }
    }

    fn priority_strategy() -> impl Strategy<Value = DispatchPriority> {
        prop_oneof![
            Just(DispatchPriority::Urgent),
            Just(DispatchPriority::High),
            Just(DispatchPriority::Normal),
            Just(DispatchPriority::Low),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Getting a non-existent entity returns Ok(None), never an error.
        #[test]
        fn prop_get_not_found_returns_none(_dummy in any::<u8>()) {
            let storage = MemoryStorage::new();
            let id = Uuid::now_v7();

            prop_assert!(storage.agent_get(id).unwrap().is_none());
            prop_assert!(storage.dispatch_get(id).unwrap().is_none());
            prop_assert!(storage.message_get(id).unwrap().is_none());
            prop_assert!(storage.alert_get(id).unwrap().is_none());
            prop_assert!(storage.event_get(id).unwrap().is_none());
        }

        /// Insert then get returns the same entity.
        #[test]
        fn prop_agent_insert_get_roundtrip(suffix in 0u32..10000) {
            let storage = MemoryStorage::new();
            let agent = make_agent(format!("agent-{suffix}"));

            storage.agent_insert(&agent).unwrap();
            let retrieved = storage.agent_get(agent.agent_id).unwrap();

            prop_assert_eq!(retrieved, Some(agent));
        }

        /// Pending order is always sorted by (urgent, priority rank, arrival).
        #[test]
        fn prop_pending_order_is_sorted(
            priorities in proptest::collection::vec(priority_strategy(), 1..12)
        ) {
            let storage = MemoryStorage::new();
            for (i, priority) in priorities.iter().enumerate() {
                storage.dispatch_insert(&make_dispatch(*priority, i as i64)).unwrap();
            }

            let pending = storage.dispatch_pending_ordered(Some("sam")).unwrap();
            prop_assert_eq!(pending.len(), priorities.len());
            for pair in pending.windows(2) {
                let key = |d: &Dispatch| (!d.is_urgent, d.priority, d.created_at);
                prop_assert!(key(&pair[0]) <= key(&pair[1]));
            }
        }

        /// Exactly one of N same-version CAS updates wins.
        #[test]
        fn prop_version_cas_admits_one_winner(claimers in 2usize..8) {
            let storage = MemoryStorage::new();
            let dispatch = make_dispatch(DispatchPriority::Normal, 0);
            storage.dispatch_insert(&dispatch).unwrap();

            let mut wins = 0;
            for _ in 0..claimers {
                let result = storage.dispatch_update(
                    dispatch.dispatch_id,
                    1,
                    DispatchUpdate {
                        status: Some(DispatchStatus::Running),
                        ..Default::default()
                    },
                );
                if result.is_ok() {
                    wins += 1;
                }
            }
            prop_assert_eq!(wins, 1);
        }

        /// Version increases by exactly one per committed update.
        #[test]
        fn prop_version_monotonic(updates in 1i64..10) {
            let storage = MemoryStorage::new();
            let agent = make_agent("sam".to_string());
            storage.agent_insert(&agent).unwrap();

            for expected in 1..=updates {
                let updated = storage.agent_update(
                    agent.agent_id,
                    expected,
                    AgentUpdate {
                        last_seen: Some(Utc::now()),
                        ..Default::default()
                    },
                ).unwrap();
                prop_assert_eq!(updated.version, expected + 1);
            }
        }
    }
}
