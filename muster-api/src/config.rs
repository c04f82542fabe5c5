//! API server configuration loaded from environment variables.

use std::net::SocketAddr;

use muster_engine::RateLimitConfig;

use crate::error::{ApiError, ApiResult};

const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

fn env_u32(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the HTTP server itself.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Interface to bind (default: 0.0.0.0).
    pub bind_host: String,

    /// Port to listen on (default: 3000).
    pub bind_port: u16,

    /// Per-agent request budgets.
    pub rate_limit: RateLimitConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: DEFAULT_PORT,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Load from environment variables.
    ///
    /// - `MUSTER_API_BIND`: bind host (default: 0.0.0.0)
    /// - `PORT` or `MUSTER_API_PORT`: listen port (default: 3000)
    /// - `MUSTER_RATE_LIMIT_ENABLED`: per-agent rate limiting (default: true)
    /// - `MUSTER_RATE_LIMIT_RPM`: sustained requests/minute (default: 120)
    /// - `MUSTER_RATE_LIMIT_BURST`: burst allowance (default: 20)
    pub fn from_env() -> Self {
        let defaults = RateLimitConfig::default();
        let bind_port = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("MUSTER_API_PORT").ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            bind_host: std::env::var("MUSTER_API_BIND")
                .unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string()),
            bind_port,
            rate_limit: RateLimitConfig {
                enabled: std::env::var("MUSTER_RATE_LIMIT_ENABLED")
                    .map(|s| s.to_lowercase() != "false")
                    .unwrap_or(defaults.enabled),
                requests_per_minute: env_u32(
                    "MUSTER_RATE_LIMIT_RPM",
                    defaults.requests_per_minute,
                ),
                burst: env_u32("MUSTER_RATE_LIMIT_BURST", defaults.burst),
            },
        }
    }

    /// Preset for local development: localhost bind, no rate limiting.
    pub fn development() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: DEFAULT_PORT,
            rate_limit: RateLimitConfig {
                enabled: false,
                ..Default::default()
            },
        }
    }

    /// Resolve the socket address to bind.
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.bind_port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }
}

// =============================================================================
// TESTS
// =============================================================================
