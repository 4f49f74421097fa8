//! Heartbeat supervision.
//!
//! One long-lived task per process sweeps the local registry: token freshness
//! enforcement, idle-timeout enforcement, keepalive pings, eviction of dead
//! entries, counts-by-agent bookkeeping, and throttled last-seen persistence.
//! The sweep self-reschedules only after the whole tick (including any
//! storage flush and sync request) completes, so a slow flush delays but
//! never overlaps the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::connection::ConnectionEntry;
use crate::registry::ConnectionRegistry;
use crate::storage::{LastSeenUpdate, Storage};
use crate::sync::DistributedSync;
use crate::telemetry::ERRORS_TOTAL;

/// The self-rescheduling sweep over the local connection registry.
pub struct HeartbeatSupervisor {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<dyn TokenVerifier>,
    storage: Arc<dyn Storage>,
    sync: Option<Arc<DistributedSync>>,
    config: GatewayConfig,
    last_flush: Mutex<Instant>,
    agent_counts: Mutex<HashMap<String, usize>>,
}

impl HeartbeatSupervisor {
    /// Create a supervisor over the given registry and collaborators.
    /// `sync` is present only in distributed mode.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        verifier: Arc<dyn TokenVerifier>,
        storage: Arc<dyn Storage>,
        sync: Option<Arc<DistributedSync>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            verifier,
            storage,
            sync,
            config,
            last_flush: Mutex::new(Instant::now()),
            agent_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Run sweeps until cancelled. Never runs two ticks concurrently: the
    /// interval starts only after the previous tick completes.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let interval = std::time::Duration::from_secs(self.config.sweep_interval_secs);
        info!(interval_secs = self.config.sweep_interval_secs, "heartbeat supervisor started");
        loop {
            self.tick().await;
            tokio::select! {
                () = sleep(interval) => {}
                () = cancel.cancelled() => {
                    info!("heartbeat supervisor stopped");
                    return;
                }
            }
        }
    }

    /// One full sweep over the registry.
    pub async fn tick(&self) {
        let now = Utc::now();
        let snapshot = self.registry.snapshot();
        let before = snapshot.len();

        // Walk a stable snapshot in reverse insertion order; removals go
        // against the live registry by id.
        for entry in snapshot.iter().rev() {
            self.process_entry(entry, now).await;
        }

        let after = self.registry.len();
        if after != before {
            debug!(client_count = after, "client count changed during sweep");
        }

        let survivors = self.registry.snapshot();
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut batch: Vec<LastSeenUpdate> = Vec::new();
        for entry in &survivors {
            let Some(user) = entry.user() else { continue };
            if !entry.agent.is_empty() {
                *counts.entry(entry.agent.clone()).or_insert(0) += 1;
            }
            batch.push(LastSeenUpdate {
                user_id: user.id,
                last_seen: entry.last_heartbeat(),
            });
        }
        *self.agent_counts.lock() = counts;

        if !batch.is_empty() {
            if let Some(sync) = &self.sync {
                sync.request_peer_snapshots().await;
            }
            self.flush_batch(batch).await;
        }
    }

    /// Live authenticated connections per agent label, as of the last sweep.
    pub fn agent_counts(&self) -> HashMap<String, usize> {
        self.agent_counts.lock().clone()
    }

    /// Apply the per-entry policy chain. Both the token check and the idle
    /// check may close the same entry; close is idempotent so that is safe.
    async fn process_entry(&self, entry: &Arc<ConnectionEntry>, now: DateTime<Utc>) {
        if let Some(token) = entry.token() {
            self.check_token(entry, &token, now).await;
        }

        let age = entry.seconds_since_heartbeat(now);
        if age >= self.config.heartbeat_timeout_secs {
            if let Some(user) = entry.user() {
                debug!(
                    id = %entry.id,
                    user = %user.name,
                    agent = %entry.agent,
                    remote_ip = %entry.remote_ip,
                    age_secs = age,
                    "client heartbeat timeout, closing"
                );
            } else {
                debug!(
                    id = %entry.id,
                    agent = %entry.agent,
                    remote_ip = %entry.remote_ip,
                    age_secs = age,
                    "unauthenticated client heartbeat timeout, closing"
                );
            }
            self.close_entry(entry).await;
        }

        // Best-effort keepalive; no response is awaited within this tick.
        // A failing ping marks the entry closeable like any transport error.
        if let Err(error) = entry.transport().ping().await {
            debug!(id = %entry.id, %error, "keepalive ping failed, closing");
            counter!(ERRORS_TOTAL, "kind" => "transport").increment(1);
            self.close_entry(entry).await;
        }

        let transport = entry.transport();
        if !transport.is_connected() && transport.pending_work() == 0 {
            debug!(
                id = %entry.id,
                user = %entry.username(),
                agent = %entry.agent,
                remote_ip = %entry.remote_ip,
                "removing disconnected client"
            );
            self.close_entry(entry).await;
            if transport.is_fully_closed() {
                let _ = self.registry.remove(&entry.id);
            } else {
                // Transport still draining; defer removal to the next tick.
                trace!(id = %entry.id, "not ready to remove client yet");
            }
        }
    }

    /// Validate the entry's token; refresh when it expires inside the lead
    /// window, close on validation or refresh failure.
    async fn check_token(&self, entry: &Arc<ConnectionEntry>, token: &str, now: DateTime<Utc>) {
        match self.verifier.decode(token) {
            Ok(claims) => {
                let lead = ChronoDuration::seconds(self.config.token_refresh_lead_secs);
                if claims.expires_at - now < lead {
                    debug!(
                        id = %entry.id,
                        user = %entry.username(),
                        agent = %entry.agent,
                        remote_ip = %entry.remote_ip,
                        "token expires soon, refreshing"
                    );
                    if !entry.transport().refresh_token().await {
                        warn!(id = %entry.id, "token refresh failed, closing");
                        counter!(ERRORS_TOTAL, "kind" => "auth").increment(1);
                        self.close_entry(entry).await;
                    }
                }
            }
            Err(error) => {
                debug!(
                    id = %entry.id,
                    user = %entry.username(),
                    agent = %entry.agent,
                    remote_ip = %entry.remote_ip,
                    %error,
                    "token validation failed, closing"
                );
                counter!(ERRORS_TOTAL, "kind" => "auth").increment(1);
                self.close_entry(entry).await;
            }
        }
    }

    /// Close the entry's transport, containing any failure to this entry.
    async fn close_entry(&self, entry: &Arc<ConnectionEntry>) {
        if let Err(error) = entry.transport().close().await {
            warn!(id = %entry.id, %error, "close failed");
            counter!(ERRORS_TOTAL, "kind" => "transport").increment(1);
        }
    }

    /// Flush the last-seen batch when the throttle window has elapsed.
    /// A failed flush drops the batch; the next qualifying tick rebuilds it.
    async fn flush_batch(&self, batch: Vec<LastSeenUpdate>) {
        let window = std::time::Duration::from_secs(self.config.flush_window_secs);
        {
            let mut last_flush = self.last_flush.lock();
            if last_flush.elapsed() < window {
                return;
            }
            *last_flush = Instant::now();
        }
        let count = batch.len();
        let started = Instant::now();
        match self.storage.batch_upsert_last_seen(batch).await {
            Ok(()) => {
                debug!(count, elapsed = ?started.elapsed(), "flushed last-seen updates");
            }
            Err(error) => {
                warn!(%error, count, "last-seen flush failed, dropping batch");
                counter!(ERRORS_TOTAL, "kind" => "storage").increment(1);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
