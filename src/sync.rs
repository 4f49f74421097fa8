//! Cross-instance snapshot exchange.
//!
//! Each instance can publish its full local registry as one message on the
//! shared bus topic and merges snapshots received from peers into the
//! [`RemoteRegistry`]. Exchange is at-least-once and best-effort: no
//! acknowledgement or versioning, last-writer-wins per connection id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::registry::{ConnectionRegistry, RemoteRegistry, RemoteSnapshot};

/// Shared topic on which snapshots and republish requests travel.
pub const SYNC_TOPIC: &str = "flowgate";

/// Message-bus collaborator. Publishes are fire-and-forget from the core's
/// perspective; delivery wiring is the embedder's concern.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `topic`, giving up after `timeout`.
    async fn publish(&self, topic: &str, payload: Vec<u8>, timeout: Duration) -> Result<()>;
}

/// Wire messages exchanged on the sync topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Full snapshot of the sender's local registry.
    Snapshot {
        /// One record per live connection on the sender.
        clients: Vec<RemoteSnapshot>,
    },
    /// Ask every instance to republish its snapshot.
    RequestSnapshot,
}

/// Serializes the local registry into snapshots, publishes them on request,
/// and merges received snapshot batches into the remote registry.
pub struct DistributedSync {
    local: Arc<ConnectionRegistry>,
    remote: Arc<RemoteRegistry>,
    bus: Arc<dyn MessageBus>,
    config: GatewayConfig,
}

impl DistributedSync {
    /// Create a sync component over the given registries and bus.
    pub fn new(
        local: Arc<ConnectionRegistry>,
        remote: Arc<RemoteRegistry>,
        bus: Arc<dyn MessageBus>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            local,
            remote,
            bus,
            config,
        }
    }

    /// The remote registry this component merges into.
    pub fn remote(&self) -> &Arc<RemoteRegistry> {
        &self.remote
    }

    /// Publish a full snapshot of the local registry on the shared topic.
    ///
    /// The remote registry is reset first; peers repopulate it by answering
    /// with their own snapshots. Publish failures are logged and swallowed.
    pub async fn publish_snapshot(&self) {
        if !self.config.distributed {
            return;
        }
        self.remote.clear();

        let snapshot = self.local.snapshot();
        let clients: Vec<RemoteSnapshot> = snapshot
            .iter()
            .rev()
            .map(|entry| RemoteSnapshot::from_entry(entry, &self.config.hostname))
            .collect();
        let count = clients.len();

        if self
            .publish(&SyncMessage::Snapshot { clients }, self.config.publish_timeout_secs)
            .await
        {
            debug!(count, hostname = %self.config.hostname, "published registry snapshot");
        }
    }

    /// Ask peer instances to republish their snapshots. Best-effort.
    pub async fn request_peer_snapshots(&self) {
        if !self.config.distributed {
            return;
        }
        let _ = self
            .publish(&SyncMessage::RequestSnapshot, self.config.request_timeout_secs)
            .await;
    }

    /// Handle a raw message delivered from the bus subscription.
    ///
    /// Snapshots are merged last-writer-wins per id; a republish request
    /// triggers [`publish_snapshot`](Self::publish_snapshot). Undecodable
    /// payloads are logged and dropped.
    pub async fn handle_message(&self, payload: &[u8]) {
        if !self.config.distributed {
            return;
        }
        let message: SyncMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(error) => {
                warn!(%error, len = payload.len(), "dropping undecodable sync message");
                return;
            }
        };
        match message {
            SyncMessage::Snapshot { clients } => {
                debug!(count = clients.len(), "merging peer snapshot batch");
                for client in clients {
                    self.remote.upsert(client);
                }
            }
            SyncMessage::RequestSnapshot => self.publish_snapshot().await,
        }
    }

    /// Serialize and publish one message; returns whether it went out.
    async fn publish(&self, message: &SyncMessage, timeout_secs: u64) -> bool {
        let payload = match serde_json::to_vec(message) {
            Ok(p) => p,
            Err(error) => {
                warn!(%error, "failed to serialize sync message");
                return false;
            }
        };
        let timeout = Duration::from_secs(timeout_secs);
        match self.bus.publish(SYNC_TOPIC, payload, timeout).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "failed to publish sync message");
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
