//! Fixed-window point-budget rate limiting.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::telemetry::RATE_LIMITED_TOTAL;

struct WindowState {
    started: Instant,
    used: u32,
}

struct WindowTable {
    map: HashMap<String, WindowState>,
    last_sweep: Instant,
}

impl WindowTable {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    /// Drop per-key state whose window has elapsed. Runs at most once per
    /// window duration so a busy limiter does not retain every key it has
    /// ever seen (connection ids are unique per accepted connection).
    fn evict_expired(&mut self, window: Duration) {
        if self.last_sweep.elapsed() < window {
            return;
        }
        self.map.retain(|_, state| state.started.elapsed() < window);
        self.last_sweep = Instant::now();
    }
}

/// One fixed-window point-budget limiter keyed by client identity
/// (IP or connection id).
///
/// A key's window opens at its first consumption; once the window elapses
/// the budget replenishes to the full point total. Exhaustion is a policy
/// signal, not an error: the caller decides whether to drop the message or
/// close the connection.
pub struct RateLimiter {
    name: &'static str,
    points: u32,
    window: Duration,
    windows: Mutex<WindowTable>,
}

impl RateLimiter {
    /// Create a limiter granting `points` per `window`.
    pub fn new(name: &'static str, points: u32, window: Duration) -> Self {
        Self {
            name,
            points,
            window,
            windows: Mutex::new(WindowTable::new()),
        }
    }

    /// Consume one point for `key`. Returns whether the action is allowed.
    pub fn consume(&self, key: &str) -> bool {
        let mut windows = self.windows.lock();
        windows.evict_expired(self.window);
        let state = windows.map.entry(key.to_string()).or_insert_with(|| WindowState {
            started: Instant::now(),
            used: 0,
        });
        if state.started.elapsed() >= self.window {
            state.started = Instant::now();
            state.used = 0;
        }
        if state.used < self.points {
            state.used += 1;
            true
        } else {
            debug!(limiter = self.name, key, "rate limit exhausted");
            counter!(RATE_LIMITED_TOTAL, "limiter" => self.name).increment(1);
            false
        }
    }

    /// Points left for `key` in its current window.
    pub fn remaining(&self, key: &str) -> u32 {
        let windows = self.windows.lock();
        match windows.map.get(key) {
            Some(state) if state.started.elapsed() < self.window => {
                self.points.saturating_sub(state.used)
            }
            _ => self.points,
        }
    }
}

/// The two independent limiters consulted by the gateway: `general` for
/// inbound traffic, `error` for repeated error conditions.
pub struct RateLimiterPair {
    /// Throttles inbound traffic per connection/IP.
    pub general: RateLimiter,
    /// Throttles repeated error conditions per connection/IP.
    pub error: RateLimiter,
}

impl RateLimiterPair {
    /// Build both limiters from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            general: RateLimiter::new(
                "general",
                config.general_points,
                Duration::from_secs(config.general_window_secs),
            ),
            error: RateLimiter::new(
                "error",
                config.error_points,
                Duration::from_secs(config.error_window_secs),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
