//! Accountability Sweeper Background Task
//!
//! One periodic task drives every engine sweep:
//!
//! - heartbeat sweep: records misses for agents past interval plus grace
//! - breaker sweep: moves cooled-down breakers from open to half-open
//! - SLA sweep: raises reply/action/report overdue alerts and escalates
//! - event sweep: expires events past their TTL
//! - stuck dispatch cleanup: fails dispatches running past the stuck age
//!
//! The task runs until the shutdown signal is received and returns its
//! metrics for a final log line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use muster_engine::Engine;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const DEFAULT_TICK_SECS: u64 = 60;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the sweeper background task.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to run all sweeps (default: 60 seconds).
    pub tick: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(DEFAULT_TICK_SECS),
        }
    }
}

impl SweeperConfig {
    /// Load from environment variables (`MUSTER_SWEEP_INTERVAL_SECS`, default: 60).
    pub fn from_env() -> Self {
        Self {
            tick: Duration::from_secs(
                std::env::var("MUSTER_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_TICK_SECS),
            ),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweeper activity since startup.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    pub cycles: AtomicU64,
    pub heartbeats_missed: AtomicU64,
    pub breakers_half_opened: AtomicU64,
    pub sla_alerts_raised: AtomicU64,
    pub sla_escalations: AtomicU64,
    pub events_expired: AtomicU64,
    pub dispatches_failed_stuck: AtomicU64,
    pub errors: AtomicU64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            heartbeats_missed: self.heartbeats_missed.load(Ordering::Relaxed),
            breakers_half_opened: self.breakers_half_opened.load(Ordering::Relaxed),
            sla_alerts_raised: self.sla_alerts_raised.load(Ordering::Relaxed),
            sla_escalations: self.sla_escalations.load(Ordering::Relaxed),
            events_expired: self.events_expired.load(Ordering::Relaxed),
            dispatches_failed_stuck: self.dispatches_failed_stuck.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct SweeperSnapshot {
    pub cycles: u64,
    pub heartbeats_missed: u64,
    pub breakers_half_opened: u64,
    pub sla_alerts_raised: u64,
    pub sla_escalations: u64,
    pub events_expired: u64,
    pub dispatches_failed_stuck: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run every engine sweep on a fixed interval until shutdown.
pub async fn sweeper_task(
    engine: Engine,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::new());

    let mut tick = interval(config.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(tick_secs = config.tick.as_secs(), "Sweeper task started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Sweeper task shutting down");
                    break;
                }
            }
            _ = tick.tick() => {
                run_cycle(&engine, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        heartbeats_missed = snapshot.heartbeats_missed,
        sla_alerts_raised = snapshot.sla_alerts_raised,
        events_expired = snapshot.events_expired,
        dispatches_failed_stuck = snapshot.dispatches_failed_stuck,
        errors = snapshot.errors,
        "Sweeper task completed"
    );

    metrics
}

/// One pass over every sweep. Errors are counted and logged, never fatal.
pub fn run_cycle(engine: &Engine, metrics: &SweeperMetrics) {
    let now = Utc::now();

    match engine.heartbeats.heartbeat_sweep(now) {
        Ok(outcome) => {
            metrics
                .heartbeats_missed
                .fetch_add(outcome.missed as u64, Ordering::Relaxed);
            if outcome.missed > 0 {
                tracing::info!(
                    examined = outcome.examined,
                    missed = outcome.missed,
                    tripped = outcome.tripped,
                    "heartbeat sweep recorded misses"
                );
            }
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "heartbeat sweep failed");
        }
    }

    match engine.heartbeats.breaker_sweep(now) {
        Ok(reopened) => {
            metrics
                .breakers_half_opened
                .fetch_add(reopened as u64, Ordering::Relaxed);
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "breaker sweep failed");
        }
    }

    match engine.messages.sla_sweep(now) {
        Ok(outcome) => {
            metrics
                .sla_alerts_raised
                .fetch_add(outcome.raised as u64, Ordering::Relaxed);
            metrics
                .sla_escalations
                .fetch_add(outcome.escalated as u64, Ordering::Relaxed);
            if outcome.raised > 0 || outcome.escalated > 0 {
                tracing::info!(
                    examined = outcome.examined,
                    raised = outcome.raised,
                    escalated = outcome.escalated,
                    "SLA sweep raised alerts"
                );
            }
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "SLA sweep failed");
        }
    }

    match engine.events.expire_sweep(now) {
        Ok(expired) => {
            metrics
                .events_expired
                .fetch_add(expired as u64, Ordering::Relaxed);
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "event expiry sweep failed");
        }
    }

    match engine.dispatches.cleanup_stuck(now) {
        Ok(outcome) => {
            metrics
                .dispatches_failed_stuck
                .fetch_add(outcome.failed as u64, Ordering::Relaxed);
            if outcome.failed > 0 {
                tracing::warn!(
                    examined = outcome.examined,
                    failed = outcome.failed,
                    retried = outcome.retried,
                    "stuck dispatch cleanup fired"
                );
            }
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "stuck dispatch cleanup failed");
        }
    }

    metrics.cycles.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::{EventPayload, MusterConfig};
    use muster_test_utils::MemoryStorage;

    fn test_engine() -> (Arc<MemoryStorage>, Engine) {
        let storage = Arc::new(MemoryStorage::new());
        let engine = Engine::new(storage.clone(), &MusterConfig::default());
        (storage, engine)
    }

    #[test]
    fn test_run_cycle_on_empty_store_is_clean() {
        let (_, engine) = test_engine();
        let metrics = SweeperMetrics::new();
        run_cycle(&engine, &metrics);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 1);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(snapshot.sla_alerts_raised, 0);
    }

    #[test]
    fn test_run_cycle_expires_lapsed_events() {
        let (_, engine) = test_engine();
        let now = Utc::now();
        engine.registry.register(now, "sam", "backend").unwrap();
        engine
            .events
            .publish(
                now - chrono::Duration::minutes(10),
                "sam",
                EventPayload::SystemAlert {
                    message: "maintenance window".to_string(),
                },
            )
            .unwrap();

        let metrics = SweeperMetrics::new();
        run_cycle(&engine, &metrics);
        assert_eq!(metrics.snapshot().events_expired, 1);
    }

    #[tokio::test]
    async fn test_sweeper_task_runs_and_shuts_down() {
        let (_, engine) = test_engine();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = SweeperConfig {
            tick: Duration::from_millis(5),
        };

        let handle = tokio::spawn(sweeper_task(engine, config, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown_tx.send(true).unwrap();

        let metrics = handle.await.unwrap();
        assert!(metrics.snapshot().cycles >= 1);
        assert_eq!(metrics.snapshot().errors, 0);
    }
}
