//! Alert Engine
//!
//! Raises, escalates, resolves, and acknowledges accountability alerts, and
//! routes each raised alert through the target's delivery preferences.
//!
//! Raising is idempotent per (message, agent, type): while an alert for that
//! key is open, raising again returns the existing record instead of piling
//! up duplicates.

use chrono::{DateTime, Utc};
use muster_core::{
    new_entity_id, AlertChannel, AlertDelivery, AlertPreferences, AlertSeverity, AlertStatus,
    AlertType, DeliveryStatus, EntityType, LoopAlert, LoopStage, MusterError, MusterResult,
};
use muster_storage::{AlertUpdate, StorageTrait};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Alert raising, routing, and lifecycle management.
#[derive(Clone)]
pub struct AlertEngine {
    storage: Arc<dyn StorageTrait>,
}

impl AlertEngine {
    pub fn new(storage: Arc<dyn StorageTrait>) -> Self {
        Self { storage }
    }

    /// Raise an alert, deduplicating against open alerts with the same
    /// (message, agent, type) key. Returns the open alert either way.
    pub fn raise(
        &self,
        now: DateTime<Utc>,
        message_id: Option<Uuid>,
        agent: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        reason: &str,
    ) -> MusterResult<LoopAlert> {
        if let Some(existing) = self.storage.alert_find_open(message_id, agent, alert_type)? {
            return Ok(existing);
        }

        let alert = LoopAlert {
            alert_id: new_entity_id(),
            message_id,
            agent_name: agent.to_string(),
            alert_type,
            severity,
            status: AlertStatus::Active,
            reason: reason.to_string(),
            escalated_to: None,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: now,
            resolved_at: None,
            version: 1,
        };
        self.storage.alert_insert(&alert)?;
        info!(
            agent = agent,
            alert_type = %alert_type,
            severity = ?severity,
            "alert raised"
        );

        self.route_delivery(now, &alert)?;
        Ok(alert)
    }

    /// Record a delivery attempt according to the target's preferences.
    ///
    /// One delivery row is written on the first configured channel; the
    /// dashboard channel is in-process and counts as sent immediately, the
    /// others wait for their external sender.
    fn route_delivery(&self, now: DateTime<Utc>, alert: &LoopAlert) -> MusterResult<()> {
        let prefs = self
            .storage
            .preferences_get(&alert.agent_name)?
            .unwrap_or_else(|| AlertPreferences::defaults_for(&alert.agent_name));

        if !prefs.wants(alert.alert_type) {
            return Ok(());
        }
        let channel = prefs
            .channel_order
            .first()
            .copied()
            .unwrap_or(AlertChannel::Dashboard);

        let status = if prefs.is_muted_at(now) {
            DeliveryStatus::Snoozed
        } else if channel == AlertChannel::Dashboard {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Pending
        };

        let delivery = AlertDelivery {
            delivery_id: new_entity_id(),
            alert_id: alert.alert_id,
            target: alert.agent_name.clone(),
            channel,
            status,
            created_at: now,
            sent_at: (status == DeliveryStatus::Sent).then_some(now),
            version: 1,
        };
        self.storage.delivery_insert(&delivery)?;
        Ok(())
    }

    /// Bump an open alert's severity if it is below `severity`.
    pub fn ensure_severity(
        &self,
        alert: &LoopAlert,
        severity: AlertSeverity,
    ) -> MusterResult<LoopAlert> {
        if !alert.is_open() || alert.severity >= severity {
            return Ok(alert.clone());
        }
        self.storage.alert_update(
            alert.alert_id,
            alert.version,
            AlertUpdate {
                severity: Some(severity),
                ..Default::default()
            },
        )
    }

    /// Escalate an alert to a supervisor, marking it critical.
    pub fn escalate(
        &self,
        now: DateTime<Utc>,
        alert: &LoopAlert,
        supervisor: &str,
    ) -> MusterResult<LoopAlert> {
        if alert.status == AlertStatus::Escalated {
            return Ok(alert.clone());
        }
        let escalated = self.storage.alert_update(
            alert.alert_id,
            alert.version,
            AlertUpdate {
                status: Some(AlertStatus::Escalated),
                severity: Some(AlertSeverity::Critical),
                escalated_to: Some(supervisor.to_string()),
                ..Default::default()
            },
        )?;
        info!(
            agent = %alert.agent_name,
            alert_type = %alert.alert_type,
            supervisor = supervisor,
            "alert escalated"
        );
        // The supervisor gets their own delivery record.
        let supervisor_copy = LoopAlert {
            agent_name: supervisor.to_string(),
            ..escalated.clone()
        };
        self.route_delivery(now, &supervisor_copy)?;
        Ok(escalated)
    }

    /// Acknowledge an alert. Acknowledging does not resolve it; the
    /// underlying deadline is still missed until the stage advances.
    pub fn acknowledge(
        &self,
        now: DateTime<Utc>,
        alert_id: Uuid,
        by: &str,
    ) -> MusterResult<LoopAlert> {
        let alert = self
            .storage
            .alert_get(alert_id)?
            .ok_or(MusterError::not_found(EntityType::Alert, alert_id))?;
        if alert.acknowledged {
            return Ok(alert);
        }
        self.storage.alert_update(
            alert_id,
            alert.version,
            AlertUpdate {
                acknowledged: Some(true),
                acknowledged_by: Some(by.to_string()),
                acknowledged_at: Some(now),
                ..Default::default()
            },
        )
    }

    /// Resolve the open alerts on a message that the new stage satisfies.
    pub fn resolve_for_stage(
        &self,
        now: DateTime<Utc>,
        message_id: Uuid,
        stage: LoopStage,
    ) -> MusterResult<usize> {
        let mut resolved = 0;
        for alert in self.storage.alert_list_open_for_message(message_id)? {
            let satisfied = match alert.alert_type {
                AlertType::ReplyOverdue => stage >= LoopStage::Replied,
                AlertType::ActionOverdue => stage >= LoopStage::Acted,
                AlertType::ReportOverdue => stage >= LoopStage::Reported,
                _ => false,
            };
            if satisfied {
                self.resolve(now, &alert)?;
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    /// Resolve every open alert on a message, regardless of type.
    pub fn resolve_all_for_message(
        &self,
        now: DateTime<Utc>,
        message_id: Uuid,
    ) -> MusterResult<usize> {
        let open = self.storage.alert_list_open_for_message(message_id)?;
        let count = open.len();
        for alert in open {
            self.resolve(now, &alert)?;
        }
        Ok(count)
    }

    /// Resolve an open agent-failure alert after the breaker closes.
    pub fn resolve_agent_failure(&self, now: DateTime<Utc>, agent: &str) -> MusterResult<()> {
        if let Some(alert) = self
            .storage
            .alert_find_open(None, agent, AlertType::AgentFailed)?
        {
            self.resolve(now, &alert)?;
        }
        Ok(())
    }

    fn resolve(&self, now: DateTime<Utc>, alert: &LoopAlert) -> MusterResult<LoopAlert> {
        let resolved = self.storage.alert_update(
            alert.alert_id,
            alert.version,
            AlertUpdate {
                status: Some(AlertStatus::Resolved),
                resolved_at: Some(now),
                ..Default::default()
            },
        )?;
        info!(
            agent = %alert.agent_name,
            alert_type = %alert.alert_type,
            "alert resolved"
        );
        Ok(resolved)
    }

    /// List alerts, optionally filtered by status.
    pub fn list(&self, status: Option<AlertStatus>) -> MusterResult<Vec<LoopAlert>> {
        self.storage.alert_list(status)
    }

    /// Fetch one alert.
    pub fn get(&self, alert_id: Uuid) -> MusterResult<Option<LoopAlert>> {
        self.storage.alert_get(alert_id)
    }
}

// =============================================================================
// TESTS
// =============================================================================
