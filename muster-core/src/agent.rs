//! Agent registry types.
//!
//! An agent's availability (`AgentStatus`) and its recovery state
//! (`CircuitState`) are deliberately separate tagged unions so that invalid
//! combinations such as "tripped and online" cannot be represented.

use crate::identity::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// STATUS
// ============================================================================

/// Availability status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Busy,
    Idle,
    #[default]
    Offline,
}

impl AgentStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Busy => "busy",
            AgentStatus::Idle => "idle",
            AgentStatus::Offline => "offline",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, AgentStatusParseError> {
        match s.to_lowercase().as_str() {
            "online" => Ok(AgentStatus::Online),
            "busy" => Ok(AgentStatus::Busy),
            "idle" => Ok(AgentStatus::Idle),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(AgentStatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentStatus {
    type Err = AgentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid agent status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatusParseError(pub String);

impl fmt::Display for AgentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid agent status: {}", self.0)
    }
}

impl std::error::Error for AgentStatusParseError {}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Recovery backoff level, mapping to 1/5/15-minute cool-downs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BackoffLevel {
    #[default]
    L0,
    L1,
    L2,
}

impl BackoffLevel {
    /// Cool-down duration before a tripped agent is retried.
    pub fn cooldown(&self) -> Duration {
        match self {
            BackoffLevel::L0 => Duration::from_secs(60),
            BackoffLevel::L1 => Duration::from_secs(5 * 60),
            BackoffLevel::L2 => Duration::from_secs(15 * 60),
        }
    }

    /// Next level after another failure, capped at L2.
    pub fn escalate(&self) -> BackoffLevel {
        match self {
            BackoffLevel::L0 => BackoffLevel::L1,
            BackoffLevel::L1 | BackoffLevel::L2 => BackoffLevel::L2,
        }
    }

    /// Numeric level as stored by the original system (0/1/2).
    pub fn as_i16(&self) -> i16 {
        match self {
            BackoffLevel::L0 => 0,
            BackoffLevel::L1 => 1,
            BackoffLevel::L2 => 2,
        }
    }
}

/// Per-agent circuit breaker state.
///
/// `Open` means no work is routed to the agent until `until` passes; the
/// breaker sweep then moves it to `HalfOpen`, where heartbeats decide whether
/// it closes again or re-opens at a higher backoff level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open {
        until: Timestamp,
        level: BackoffLevel,
    },
    HalfOpen {
        level: BackoffLevel,
    },
}

impl CircuitState {
    /// Whether the breaker is tripped (anything but closed).
    pub fn is_tripped(&self) -> bool {
        !matches!(self, CircuitState::Closed)
    }

    /// Whether the agent may be selected as a dispatch target.
    ///
    /// Half-open agents are selectable: routing them a little work is how the
    /// breaker probes recovery.
    pub fn allows_dispatch(&self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen { .. })
    }

    /// Trip the breaker at the given backoff level.
    pub fn trip(now: Timestamp, level: BackoffLevel) -> CircuitState {
        let until = now
            + chrono::Duration::from_std(level.cooldown())
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        CircuitState::Open { until, level }
    }
}

// ============================================================================
// HEALTH COUNTERS
// ============================================================================

/// Health counters fed by the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentHealth {
    /// Consecutive failed heartbeat checks since the last success.
    pub consecutive_failures: i32,

    /// Total breaker-driven restart attempts.
    pub restart_count: i32,

    /// Consecutive successful heartbeats while half-open.
    pub recovery_successes: i32,

    /// When the last breaker retry was attempted.
    pub last_restart_at: Option<Timestamp>,
}

/// Outcome of a single heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    /// No pending-work signals found.
    Ok,
    /// Unread messages, unstarted dispatches, or a self-reported block.
    PendingWork,
}

// ============================================================================
// AGENT RECORD
// ============================================================================

/// A registered agent.
///
/// Agents are never hard-deleted; `retired` soft-removes them from routing
/// while keeping their history addressable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: EntityId,
    /// Unique short name used for addressing ("sam", "leo", "max").
    pub name: String,
    /// Free-form role description ("backend", "reviewer").
    pub role: String,
    pub status: AgentStatus,
    pub status_reason: Option<String>,
    pub status_since: Timestamp,
    pub last_heartbeat: Option<Timestamp>,
    pub last_seen: Option<Timestamp>,
    pub circuit: CircuitState,
    pub health: AgentHealth,
    /// Self-reported working-context note, scanned for block keywords.
    pub working_context: Option<String>,
    /// Minute offset within the quarter-hour at which this agent's
    /// heartbeat slot fires.
    pub heartbeat_slot: u32,
    pub retired: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Optimistic concurrency version; bumped on every committed update.
    pub version: i64,
}

impl Agent {
    /// Whether this agent is a valid dispatch target right now.
    pub fn is_dispatchable(&self) -> bool {
        !self.retired && self.circuit.allows_dispatch()
    }
}

// =============================================================================
// TESTS
// =============================================================================
