//! Rate Limit Guard
//!
//! Per-agent request budgets enforced with a keyed set of GCRA limiters.
//! A breach returns `RateLimited` with a retry hint and raises a warning
//! alert against the offender, deduplicated while one is open.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use muster_core::{AlertSeverity, AlertType, MusterError, MusterResult, RateLimitError};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

use crate::alerts::AlertEngine;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Request budget settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Sustained requests per minute per agent.
    pub requests_per_minute: u32,
    /// Burst allowance on top of the sustained rate.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 120,
            burst: 20,
        }
    }
}

/// Per-agent rate limiting with lock-free limiter lookup.
#[derive(Clone)]
pub struct RateLimitGuard {
    config: RateLimitConfig,
    limiters: Arc<DashMap<String, Arc<DirectRateLimiter>>>,
    alerts: AlertEngine,
}

impl RateLimitGuard {
    pub fn new(config: RateLimitConfig, alerts: AlertEngine) -> Self {
        Self {
            config,
            limiters: Arc::new(DashMap::new()),
            alerts,
        }
    }

    /// Charge one request against an agent's budget.
    pub fn check(&self, now: DateTime<Utc>, target: &str) -> MusterResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let limiter = self.get_or_create_limiter(target);
        match limiter.check() {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let retry_after_secs = not_until
                    .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                    .as_secs()
                    .max(1);
                warn!(target = target, retry_after_secs, "rate limit exceeded");
                self.alerts.raise(
                    now,
                    None,
                    target,
                    AlertType::RateLimited,
                    AlertSeverity::Warning,
                    &format!(
                        "exceeded {} requests/minute",
                        self.config.requests_per_minute
                    ),
                )?;
                Err(MusterError::RateLimit(RateLimitError::LimitExceeded {
                    target: target.to_string(),
                    retry_after_secs,
                }))
            }
        }
    }

    fn get_or_create_limiter(&self, target: &str) -> Arc<DirectRateLimiter> {
        self.limiters
            .entry(target.to_string())
            .or_insert_with(|| {
                let quota = Quota::per_minute(
                    NonZeroU32::new(self.config.requests_per_minute).unwrap_or(NonZeroU32::MIN),
                )
                .allow_burst(NonZeroU32::new(self.config.burst).unwrap_or(NonZeroU32::MIN));
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }
}

// =============================================================================
// TESTS
// =============================================================================
