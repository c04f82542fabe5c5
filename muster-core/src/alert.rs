//! Accountability alert types.
//!
//! Alerts are raised by the SLA sweep, the heartbeat monitor, and the rate
//! limiter; delivery preferences decide whether a raised alert actually
//! reaches anyone right now or is snoozed until quiet hours end.

use crate::identity::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ALERT TYPE AND SEVERITY
// ============================================================================

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Seen but not replied within the reply window.
    ReplyOverdue,
    /// Replied but not acted within the action window.
    ActionOverdue,
    /// Acted but not reported within the report window.
    ReportOverdue,
    /// A participant explicitly abandoned the loop.
    LoopBroken,
    /// Heartbeat misses tripped the circuit breaker, or retries ran out.
    AgentFailed,
    /// A caller exceeded its per-minute request budget.
    RateLimited,
}

impl AlertType {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AlertType::ReplyOverdue => "reply_overdue",
            AlertType::ActionOverdue => "action_overdue",
            AlertType::ReportOverdue => "report_overdue",
            AlertType::LoopBroken => "loop_broken",
            AlertType::AgentFailed => "agent_failed",
            AlertType::RateLimited => "rate_limited",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, AlertTypeParseError> {
        match s.to_lowercase().as_str() {
            "reply_overdue" => Ok(AlertType::ReplyOverdue),
            "action_overdue" => Ok(AlertType::ActionOverdue),
            "report_overdue" => Ok(AlertType::ReportOverdue),
            "loop_broken" => Ok(AlertType::LoopBroken),
            "agent_failed" => Ok(AlertType::AgentFailed),
            "rate_limited" => Ok(AlertType::RateLimited),
            _ => Err(AlertTypeParseError(s.to_string())),
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AlertType {
    type Err = AlertTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid alert type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertTypeParseError(pub String);

impl fmt::Display for AlertTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid alert type: {}", self.0)
    }
}

impl std::error::Error for AlertTypeParseError {}

/// Severity of an alert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Warning,
    Critical,
}

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Active,
    Resolved,
    Escalated,
}

// ============================================================================
// ALERT RECORD
// ============================================================================

/// An accountability alert against an agent, usually tied to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopAlert {
    pub alert_id: EntityId,
    /// Message this alert tracks, absent for agent-level alerts.
    pub message_id: Option<EntityId>,
    /// Agent held accountable.
    pub agent_name: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub reason: String,
    /// Supervisor name once escalated.
    pub escalated_to: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
    /// Optimistic concurrency version; bumped on every committed update.
    pub version: i64,
}

impl LoopAlert {
    /// Whether the alert still demands attention.
    pub fn is_open(&self) -> bool {
        matches!(self.status, AlertStatus::Active | AlertStatus::Escalated)
    }
}

// ============================================================================
// DELIVERY PREFERENCES
// ============================================================================

/// Channel over which an alert can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Dashboard,
    Slack,
    Email,
    Webhook,
}

/// Daily do-not-disturb window in UTC hours. Wrapping windows (22 to 6) are
/// supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    /// Whether `hour` falls inside the window.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Per-target alert delivery preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPreferences {
    /// Agent or human name these preferences belong to.
    pub target: String,
    /// Alert types the target wants delivered. Empty means everything.
    pub enabled_types: Vec<AlertType>,
    /// Channels to attempt, in order.
    pub channel_order: Vec<AlertChannel>,
    pub quiet_hours: Option<QuietHours>,
    pub snoozed_until: Option<Timestamp>,
    /// Optimistic concurrency version; bumped on every committed update.
    pub version: i64,
}

impl AlertPreferences {
    /// Baseline preferences: everything enabled, dashboard only.
    pub fn defaults_for(target: &str) -> Self {
        Self {
            target: target.to_string(),
            enabled_types: Vec::new(),
            channel_order: vec![AlertChannel::Dashboard],
            quiet_hours: None,
            snoozed_until: None,
            version: 1,
        }
    }

    /// Whether this alert type should be delivered at all.
    pub fn wants(&self, alert_type: AlertType) -> bool {
        self.enabled_types.is_empty() || self.enabled_types.contains(&alert_type)
    }

    /// Whether delivery should be deferred at `now`.
    pub fn is_muted_at(&self, now: Timestamp) -> bool {
        if let Some(until) = self.snoozed_until {
            if now < until {
                return true;
            }
        }
        if let Some(quiet) = self.quiet_hours {
            use chrono::Timelike;
            if quiet.contains(now.hour()) {
                return true;
            }
        }
        false
    }
}

// ============================================================================
// DELIVERY RECORD
// ============================================================================

/// Status of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Sent,
    Failed,
    Snoozed,
}

/// One attempt to deliver an alert over one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDelivery {
    pub delivery_id: EntityId,
    pub alert_id: EntityId,
    pub target: String,
    pub channel: AlertChannel,
    pub status: DeliveryStatus,
    pub created_at: Timestamp,
    pub sent_at: Option<Timestamp>,
    /// Optimistic concurrency version; bumped on every committed update.
    pub version: i64,
}

// =============================================================================
// TESTS
// =============================================================================
