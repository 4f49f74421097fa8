//! Connection entry state and the transport capability seam.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Capability surface the registry needs from the underlying transport.
///
/// The transport object owns framing, read/write loops, and per-connection
/// message correlation; the registry only pings it, closes it, and inspects
/// its drain state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a keepalive ping frame. Best-effort; no response is awaited.
    async fn ping(&self) -> Result<()>;

    /// Close the connection. Idempotent; safe to call from multiple paths.
    async fn close(&self) -> Result<()>;

    /// Push a fresh signed token to the client. Returns `false` when the
    /// refresh could not be completed and the connection should be closed.
    async fn refresh_token(&self) -> bool;

    /// Whether the transport considers itself connected.
    fn is_connected(&self) -> bool;

    /// Whether the underlying socket has fully closed. Removal from the
    /// registry waits for this even after `close`.
    fn is_fully_closed(&self) -> bool;

    /// Outstanding work items (unanswered replies). While non-zero, removal
    /// is deferred so the transport can drain.
    fn pending_work(&self) -> usize;
}

/// Generate a unique, time-sortable connection id for a freshly accepted
/// transport.
pub fn generate_connection_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Authenticated identity bound to a connection.
///
/// `acl` is the opaque access-control blob evaluated by the
/// [`Authorizer`](crate::auth::Authorizer); it travels in cross-instance
/// snapshots but is never exposed through the query surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundUser {
    /// Unique user id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Opaque access-control material.
    #[serde(default)]
    pub acl: serde_json::Value,
}

/// One live local connection tracked by the registry.
///
/// The id is unique within the registry for the entry's whole lifetime.
/// Heartbeat and auth fields are mutated by the transport adapter as traffic
/// and sign-in events occur, and by the supervisor on token refresh.
pub struct ConnectionEntry {
    /// Unique connection id.
    pub id: String,
    /// When the connection was accepted.
    pub created: DateTime<Utc>,
    /// Remote peer address.
    pub remote_ip: String,
    /// Negotiated agent label (e.g. `"browser"`, `"worker"`).
    pub agent: String,
    /// Client version string.
    pub version: String,
    /// Negotiated protocol label.
    pub protocol: String,
    user: Mutex<Option<BoundUser>>,
    token: Mutex<Option<String>>,
    last_heartbeat: Mutex<DateTime<Utc>>,
    exchanges: Mutex<Vec<String>>,
    queues: Mutex<Vec<String>>,
    watches: Mutex<Vec<String>>,
    /// Depth of the reply queue, reported by the transport adapter.
    pending_replies: AtomicUsize,
    transport: Arc<dyn Transport>,
}

impl ConnectionEntry {
    /// Create an entry for a freshly accepted connection.
    pub fn new(
        id: impl Into<String>,
        remote_ip: impl Into<String>,
        agent: impl Into<String>,
        version: impl Into<String>,
        protocol: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created: now,
            remote_ip: remote_ip.into(),
            agent: agent.into(),
            version: version.into(),
            protocol: protocol.into(),
            user: Mutex::new(None),
            token: Mutex::new(None),
            last_heartbeat: Mutex::new(now),
            exchanges: Mutex::new(Vec::new()),
            queues: Mutex::new(Vec::new()),
            watches: Mutex::new(Vec::new()),
            pending_replies: AtomicUsize::new(0),
            transport,
        }
    }

    /// The transport handle.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Bind an authenticated user to this connection.
    pub fn bind_user(&self, user: BoundUser) {
        *self.user.lock() = Some(user);
    }

    /// The bound user, if the connection has signed in.
    pub fn user(&self) -> Option<BoundUser> {
        self.user.lock().clone()
    }

    /// Display name of the bound user, empty when anonymous.
    pub fn username(&self) -> String {
        self.user.lock().as_ref().map(|u| u.name.clone()).unwrap_or_default()
    }

    /// Store fresh signed token material.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.lock() = Some(token.into());
    }

    /// Current token material, if any.
    pub fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    /// Record inbound traffic. The heartbeat timestamp never moves backwards.
    pub fn touch(&self) {
        let mut hb = self.last_heartbeat.lock();
        let now = Utc::now();
        if now > *hb {
            *hb = now;
        }
    }

    /// Overwrite the heartbeat timestamp. Transport adapters restoring state
    /// use this; normal traffic goes through [`touch`](Self::touch).
    pub fn set_last_heartbeat(&self, at: DateTime<Utc>) {
        *self.last_heartbeat.lock() = at;
    }

    /// When the connection last showed signs of life.
    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        *self.last_heartbeat.lock()
    }

    /// Seconds since the last heartbeat, relative to `now`.
    pub fn seconds_since_heartbeat(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat()).num_seconds()
    }

    /// Replace the registered exchange names.
    pub fn set_exchanges(&self, names: Vec<String>) {
        *self.exchanges.lock() = names;
    }

    /// Registered exchange names.
    pub fn exchanges(&self) -> Vec<String> {
        self.exchanges.lock().clone()
    }

    /// Replace the registered queue names.
    pub fn set_queues(&self, names: Vec<String>) {
        *self.queues.lock() = names;
    }

    /// Registered queue names.
    pub fn queues(&self) -> Vec<String> {
        self.queues.lock().clone()
    }

    /// Replace the active watch handles.
    pub fn set_watches(&self, names: Vec<String>) {
        *self.watches.lock() = names;
    }

    /// Active watch handles.
    pub fn watches(&self) -> Vec<String> {
        self.watches.lock().clone()
    }

    /// Report the current reply-queue depth.
    pub fn set_pending_replies(&self, depth: usize) {
        self.pending_replies.store(depth, Ordering::Relaxed);
    }

    /// Current reply-queue depth.
    pub fn pending_replies(&self) -> usize {
        self.pending_replies.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("id", &self.id)
            .field("remote_ip", &self.remote_ip)
            .field("agent", &self.agent)
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
