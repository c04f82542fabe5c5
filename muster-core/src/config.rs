//! Runtime configuration for the coordination core.
//!
//! All intervals and thresholds are loaded from environment variables with
//! sensible defaults, following the `MUSTER_*` naming convention. The
//! `development()` preset shortens every window for local testing.

use std::time::Duration;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_HEARTBEAT_GRACE_SECS: u64 = 2 * 60;
const DEFAULT_HEARTBEAT_SLOT_STRIDE_MINUTES: u32 = 5;
const DEFAULT_TRIP_THRESHOLD: i32 = 3;
const DEFAULT_RESET_SUCCESSES: i32 = 3;

const DEFAULT_MAX_RETRIES: i32 = 3;
const DEFAULT_STUCK_DISPATCH_AGE_SECS: u64 = 30 * 60;

const DEFAULT_REPLY_WINDOW_SECS: u64 = 15 * 60;
const DEFAULT_ACTION_WINDOW_SECS: u64 = 2 * 60 * 60;
const DEFAULT_REPORT_WINDOW_SECS: u64 = 24 * 60 * 60;
const DEFAULT_SUPERVISOR: &str = "supervisor";

const DEFAULT_EVENT_TTL_SECS: u64 = 5 * 60;

fn env_secs(var: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(var)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

fn env_i32(var: &str, default: i32) -> i32 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// HEARTBEAT
// ============================================================================

/// Configuration for the heartbeat monitor and circuit breaker.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Expected interval between heartbeats per agent (default: 15 minutes).
    pub interval: Duration,

    /// Extra slack before a late heartbeat counts as a miss (default: 2 minutes).
    pub grace: Duration,

    /// Minutes between staggered agent slots within a quarter-hour (default: 5).
    pub slot_stride_minutes: u32,

    /// Consecutive misses before the circuit breaker trips (default: 3).
    pub trip_threshold: i32,

    /// Consecutive post-trip successes before the breaker resets (default: 3).
    pub reset_successes: i32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            grace: Duration::from_secs(DEFAULT_HEARTBEAT_GRACE_SECS),
            slot_stride_minutes: DEFAULT_HEARTBEAT_SLOT_STRIDE_MINUTES,
            trip_threshold: DEFAULT_TRIP_THRESHOLD,
            reset_successes: DEFAULT_RESET_SUCCESSES,
        }
    }
}

impl HeartbeatConfig {
    /// Load from environment variables.
    ///
    /// - `MUSTER_HEARTBEAT_INTERVAL_SECS` (default: 900)
    /// - `MUSTER_HEARTBEAT_GRACE_SECS` (default: 120)
    /// - `MUSTER_HEARTBEAT_TRIP_THRESHOLD` (default: 3)
    /// - `MUSTER_HEARTBEAT_RESET_SUCCESSES` (default: 3)
    pub fn from_env() -> Self {
        Self {
            interval: env_secs("MUSTER_HEARTBEAT_INTERVAL_SECS", DEFAULT_HEARTBEAT_INTERVAL_SECS),
            grace: env_secs("MUSTER_HEARTBEAT_GRACE_SECS", DEFAULT_HEARTBEAT_GRACE_SECS),
            slot_stride_minutes: DEFAULT_HEARTBEAT_SLOT_STRIDE_MINUTES,
            trip_threshold: env_i32("MUSTER_HEARTBEAT_TRIP_THRESHOLD", DEFAULT_TRIP_THRESHOLD),
            reset_successes: env_i32(
                "MUSTER_HEARTBEAT_RESET_SUCCESSES",
                DEFAULT_RESET_SUCCESSES,
            ),
        }
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Configuration for the dispatch queue retry policy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum automatic retries per dispatch (default: 3).
    pub max_retries: i32,

    /// Exponential retry backoff schedule, indexed by retry count (1m/5m/15m).
    pub retry_backoff: Vec<Duration>,

    /// Age past which a running dispatch is considered stuck (default: 30 minutes).
    pub stuck_age: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: vec![
                Duration::from_secs(60),
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
            ],
            stuck_age: Duration::from_secs(DEFAULT_STUCK_DISPATCH_AGE_SECS),
        }
    }
}

impl DispatchConfig {
    /// Load from environment variables.
    ///
    /// - `MUSTER_DISPATCH_MAX_RETRIES` (default: 3)
    /// - `MUSTER_DISPATCH_STUCK_AGE_SECS` (default: 1800)
    pub fn from_env() -> Self {
        Self {
            max_retries: env_i32("MUSTER_DISPATCH_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            stuck_age: env_secs(
                "MUSTER_DISPATCH_STUCK_AGE_SECS",
                DEFAULT_STUCK_DISPATCH_AGE_SECS,
            ),
            ..Default::default()
        }
    }

    /// Backoff delay before the nth retry, capped at the last schedule entry.
    pub fn backoff_for(&self, retry_count: i32) -> Duration {
        let idx = retry_count.max(0) as usize;
        self.retry_backoff
            .get(idx.min(self.retry_backoff.len().saturating_sub(1)))
            .copied()
            .unwrap_or(Duration::from_secs(60))
    }
}

// ============================================================================
// SLA
// ============================================================================

/// Deadlines for the five-stage message loop.
#[derive(Debug, Clone)]
pub struct SlaConfig {
    /// Window from `seen` to expected reply (default: 15 minutes).
    pub reply_window: Duration,

    /// Window from `replied` to expected action (default: 2 hours).
    pub action_window: Duration,

    /// Window from `acted` to expected report (default: 24 hours).
    pub report_window: Duration,

    /// Agent name that receives escalated alerts.
    pub supervisor: String,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            reply_window: Duration::from_secs(DEFAULT_REPLY_WINDOW_SECS),
            action_window: Duration::from_secs(DEFAULT_ACTION_WINDOW_SECS),
            report_window: Duration::from_secs(DEFAULT_REPORT_WINDOW_SECS),
            supervisor: DEFAULT_SUPERVISOR.to_string(),
        }
    }
}

impl SlaConfig {
    /// Load from environment variables.
    ///
    /// - `MUSTER_SLA_REPLY_SECS` (default: 900)
    /// - `MUSTER_SLA_ACTION_SECS` (default: 7200)
    /// - `MUSTER_SLA_REPORT_SECS` (default: 86400)
    /// - `MUSTER_SLA_SUPERVISOR` (default: "supervisor")
    pub fn from_env() -> Self {
        Self {
            reply_window: env_secs("MUSTER_SLA_REPLY_SECS", DEFAULT_REPLY_WINDOW_SECS),
            action_window: env_secs("MUSTER_SLA_ACTION_SECS", DEFAULT_ACTION_WINDOW_SECS),
            report_window: env_secs("MUSTER_SLA_REPORT_SECS", DEFAULT_REPORT_WINDOW_SECS),
            supervisor: std::env::var("MUSTER_SLA_SUPERVISOR")
                .unwrap_or_else(|_| DEFAULT_SUPERVISOR.to_string()),
        }
    }
}

// ============================================================================
// EVENT BUS
// ============================================================================

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Time-to-live for published events (default: 5 minutes).
    pub ttl: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_EVENT_TTL_SECS),
        }
    }
}

impl EventConfig {
    /// Load from environment variables (`MUSTER_EVENT_TTL_SECS`, default: 300).
    pub fn from_env() -> Self {
        Self {
            ttl: env_secs("MUSTER_EVENT_TTL_SECS", DEFAULT_EVENT_TTL_SECS),
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

/// Aggregated configuration for the whole core.
#[derive(Debug, Clone, Default)]
pub struct MusterConfig {
    pub heartbeat: HeartbeatConfig,
    pub dispatch: DispatchConfig,
    pub sla: SlaConfig,
    pub events: EventConfig,
}

impl MusterConfig {
    /// Load every section from environment variables.
    pub fn from_env() -> Self {
        Self {
            heartbeat: HeartbeatConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
            sla: SlaConfig::from_env(),
            events: EventConfig::from_env(),
        }
    }

    /// Preset with short windows for local development and tests.
    pub fn development() -> Self {
        Self {
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(60),
                grace: Duration::from_secs(10),
                ..Default::default()
            },
            dispatch: DispatchConfig {
                retry_backoff: vec![
                    Duration::from_secs(1),
                    Duration::from_secs(5),
                    Duration::from_secs(15),
                ],
                stuck_age: Duration::from_secs(60),
                ..Default::default()
            },
            sla: SlaConfig {
                reply_window: Duration::from_secs(30),
                action_window: Duration::from_secs(120),
                report_window: Duration::from_secs(600),
                ..Default::default()
            },
            events: EventConfig {
                ttl: Duration::from_secs(30),
            },
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
