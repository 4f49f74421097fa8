//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the connection registry and heartbeat supervisor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Seconds between heartbeat sweeps. The next sweep is scheduled only
    /// after the previous one completes, so this is a gap, not a rate.
    pub sweep_interval_secs: u64,
    /// Close a connection once this many seconds pass without a heartbeat.
    pub heartbeat_timeout_secs: i64,
    /// Attempt a token refresh when expiry is nearer than this.
    pub token_refresh_lead_secs: i64,
    /// Minimum seconds between batched last-seen storage writes.
    pub flush_window_secs: u64,
    /// Whether multiple instances share registry visibility over the bus.
    pub distributed: bool,
    /// Instance identity stamped on published snapshots.
    pub hostname: String,
    /// Bus timeout for publishing a full snapshot.
    pub publish_timeout_secs: u64,
    /// Bus timeout for asking peers to republish their snapshots.
    pub request_timeout_secs: u64,
    /// Point budgets for the general/error rate limiters.
    pub rate_limit: RateLimitConfig,
}

/// Point budgets and window lengths for the two fixed-window limiters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Points per window for general inbound traffic.
    pub general_points: u32,
    /// Window length in seconds for the general limiter.
    pub general_window_secs: u64,
    /// Points per window for repeated error conditions.
    pub error_points: u32,
    /// Window length in seconds for the error limiter.
    pub error_window_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 10,
            heartbeat_timeout_secs: 60,
            token_refresh_lead_secs: 60,
            flush_window_secs: 60,
            distributed: false,
            hostname: default_hostname(),
            publish_timeout_secs: 20,
            request_timeout_secs: 10,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general_points: 30,
            general_window_secs: 1,
            error_points: 30,
            error_window_secs: 2,
        }
    }
}

/// Instance hostname from the environment, `"unknown"` when unset.
fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into())
}
