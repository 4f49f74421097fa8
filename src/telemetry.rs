//! Prometheus recorder install, pull-model collectors, and metric names.
//!
//! Registry-shaped metrics are pull-model: a collector closure reads a live
//! registry snapshot and sets gauges when [`TelemetryAdapter::observe`] runs,
//! which the `/metrics` handler calls immediately before rendering. Counters
//! (rate limiting, errors) are event-driven and recorded at the call site.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::registry::ConnectionRegistry;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// Online clients partitioned by agent label (gauge, labels: agent).
pub const ONLINE_CLIENTS: &str = "gateway_online_clients";
/// Registered queues per connection (gauge, labels: client_id).
pub const QUEUE_DEPTH: &str = "gateway_queue_depth";
/// Messages waiting on a reply per connection (gauge, labels: client_id).
pub const PENDING_REPLIES: &str = "gateway_pending_replies";
/// Active watch handles per connection (gauge, labels: client_id, agent).
pub const WATCH_COUNT: &str = "gateway_watch_count";
/// Connection attempts partitioned by remote IP (gauge, labels: remote_ip).
pub const CONNECTION_ATTEMPTS: &str = "gateway_connection_attempts";
/// Rate-limited actions total (counter, labels: limiter).
pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
/// Gateway errors total (counter, labels: kind).
pub const ERRORS_TOTAL: &str = "gateway_errors_total";

type Collector = Box<dyn Fn() + Send + Sync>;

/// Holds the pull callbacks invoked at export time.
///
/// Collectors must be side-effect-free over a registry snapshot, O(registry
/// size), and must never block on I/O.
#[derive(Default)]
pub struct TelemetryAdapter {
    collectors: RwLock<Vec<Collector>>,
}

impl TelemetryAdapter {
    /// Create an adapter with no collectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pull callback.
    pub fn register<F>(&self, collector: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.collectors.write().push(Box::new(collector));
    }

    /// Number of registered collectors.
    pub fn collector_count(&self) -> usize {
        self.collectors.read().len()
    }

    /// Run every collector. Called by the export handler before rendering.
    pub fn observe(&self) {
        for collector in self.collectors.read().iter() {
            collector();
        }
    }

    /// Run the collectors, then render Prometheus text format.
    pub fn render(&self, handle: &PrometheusHandle) -> String {
        self.observe();
        handle.render()
    }

    /// Register the standard registry collectors.
    #[allow(clippy::cast_precision_loss)]
    pub fn register_registry_collectors(&self, registry: Arc<ConnectionRegistry>) {
        // Online clients by agent. Agents seen in earlier observations are
        // zeroed first so a drained agent label reads 0, not its last value.
        let reg = registry.clone();
        let seen_agents: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        self.register(move || {
            let mut seen = seen_agents.lock();
            for agent in seen.iter() {
                gauge!(ONLINE_CLIENTS, "agent" => agent.clone()).set(0.0);
            }
            let mut counts: std::collections::HashMap<String, usize> =
                std::collections::HashMap::new();
            for entry in reg.snapshot() {
                let agent = if entry.agent.is_empty() {
                    "unknown".to_string()
                } else {
                    entry.agent.clone()
                };
                *counts.entry(agent).or_insert(0) += 1;
            }
            for (agent, count) in counts {
                gauge!(ONLINE_CLIENTS, "agent" => agent.clone()).set(count as f64);
                let _ = seen.insert(agent);
            }
        });

        // Per-connection queue depth.
        let reg = registry.clone();
        self.register(move || {
            for entry in reg.snapshot() {
                gauge!(QUEUE_DEPTH, "client_id" => entry.id.clone())
                    .set(entry.queues().len() as f64);
            }
        });

        // Per-connection pending-reply depth.
        let reg = registry.clone();
        self.register(move || {
            for entry in reg.snapshot() {
                gauge!(PENDING_REPLIES, "client_id" => entry.id.clone())
                    .set(entry.pending_replies() as f64);
            }
        });

        // Per-connection watch count.
        let reg = registry.clone();
        self.register(move || {
            for entry in reg.snapshot() {
                gauge!(
                    WATCH_COUNT,
                    "client_id" => entry.id.clone(),
                    "agent" => entry.agent.clone()
                )
                .set(entry.watches().len() as f64);
            }
        });

        // Connection attempts by remote IP. Colons in IPv6 addresses are
        // replaced so the label survives Prometheus tooling.
        let reg = registry;
        self.register(move || {
            for (ip, count) in reg.attempts_by_ip() {
                gauge!(CONNECTION_ATTEMPTS, "remote_ip" => ip.replace(':', "-"))
                    .set(count as f64);
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionEntry, Transport};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        async fn refresh_token(&self) -> bool {
            true
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn is_fully_closed(&self) -> bool {
            false
        }
        fn pending_work(&self) -> usize {
            0
        }
    }

    #[test]
    fn observe_runs_every_collector() {
        let adapter = TelemetryAdapter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            adapter.register(move || {
                let _ = calls.fetch_add(1, Ordering::Relaxed);
            });
        }
        adapter.observe();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        adapter.observe();
        assert_eq!(calls.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn registry_collectors_register_five() {
        let adapter = TelemetryAdapter::new();
        adapter.register_registry_collectors(Arc::new(ConnectionRegistry::new()));
        assert_eq!(adapter.collector_count(), 5);
    }

    #[test]
    fn collectors_survive_populated_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let entry = Arc::new(ConnectionEntry::new(
            "c1",
            "2001-db8--1",
            "browser",
            "1.0.0",
            "ws",
            Arc::new(NullTransport),
        ));
        entry.set_queues(vec!["q1".into()]);
        entry.set_watches(vec!["w1".into(), "w2".into()]);
        registry.add(entry);
        registry.note_attempt("2001:db8::1");

        let adapter = TelemetryAdapter::new();
        adapter.register_registry_collectors(registry);
        // Smoke: must not panic even without an installed recorder.
        adapter.observe();
        adapter.observe();
    }

    #[test]
    fn render_produces_prometheus_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let adapter = TelemetryAdapter::new();
        adapter.register_registry_collectors(Arc::new(ConnectionRegistry::new()));
        let output = adapter.render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            ONLINE_CLIENTS,
            QUEUE_DEPTH,
            PENDING_REPLIES,
            WATCH_COUNT,
            CONNECTION_ATTEMPTS,
            RATE_LIMITED_TOTAL,
            ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
