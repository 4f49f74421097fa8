//! Local and remote connection registries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{BoundUser, ConnectionEntry};

/// Process-wide collection of live local connections.
///
/// Mutation and iteration are synchronized through the inner lock; sweeps and
/// queries iterate a point-in-time [`snapshot`](Self::snapshot) and apply
/// removals against the live structure by id, so concurrent adds never
/// perturb an in-flight walk.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<Vec<Arc<ConnectionEntry>>>,
    attempts: Mutex<HashMap<String, u64>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly accepted connection. Never rejects.
    pub fn add(&self, entry: Arc<ConnectionEntry>) {
        self.entries.write().push(entry);
    }

    /// Remove a connection by id. Idempotent; returns whether an entry
    /// was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Look up a connection by id.
    pub fn get(&self, id: &str) -> Option<Arc<ConnectionEntry>> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    /// Point-in-time copy of the registry in insertion order, safe to
    /// iterate while concurrent adds and removes happen elsewhere.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionEntry>> {
        self.entries.read().clone()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Count a connection attempt from `remote_ip`.
    pub fn note_attempt(&self, remote_ip: &str) {
        *self.attempts.lock().entry(remote_ip.to_string()).or_insert(0) += 1;
    }

    /// Connection-attempt counts partitioned by remote IP.
    pub fn attempts_by_ip(&self) -> HashMap<String, u64> {
        self.attempts.lock().clone()
    }
}

/// Point-in-time reportable copy of a connection, as exchanged between
/// instances. No live transport handle; replaced wholesale on upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Connection id, unique within the owning instance.
    pub id: String,
    /// Hostname of the reporting instance.
    pub hostname: String,
    /// Composed display name: `username/agent/id`.
    pub name: String,
    /// Agent label.
    pub agent: String,
    /// Client version string.
    pub version: String,
    /// Negotiated protocol label.
    pub protocol: String,
    /// Remote peer address.
    pub remote_ip: String,
    /// Display name of the bound user, empty when anonymous.
    pub username: String,
    /// Bound user, if signed in.
    pub user: Option<BoundUser>,
    /// Registered exchange names.
    pub exchanges: Vec<String>,
    /// Registered queue names.
    pub queues: Vec<String>,
    /// Number of active watch handles.
    pub watch_count: usize,
    /// When the connection was accepted.
    pub created: DateTime<Utc>,
    /// When the connection last showed signs of life.
    pub last_heartbeat: DateTime<Utc>,
}

impl RemoteSnapshot {
    /// Build a snapshot of a local entry, stamped with the reporting
    /// instance's hostname.
    pub fn from_entry(entry: &ConnectionEntry, hostname: &str) -> Self {
        let username = entry.username();
        let name = format!("{}/{}/{}", username, entry.agent, entry.id)
            .trim_matches('/')
            .to_string();
        Self {
            id: entry.id.clone(),
            hostname: hostname.to_string(),
            name,
            agent: entry.agent.clone(),
            version: entry.version.clone(),
            protocol: entry.protocol.clone(),
            remote_ip: entry.remote_ip.clone(),
            username,
            user: entry.user(),
            exchanges: entry.exchanges(),
            queues: entry.queues(),
            watch_count: entry.watches().len(),
            created: entry.created,
            last_heartbeat: entry.last_heartbeat(),
        }
    }
}

/// Connection snapshots reported by peer instances.
///
/// Logically a cache: entries are never independently expired. A peer that
/// crashes without republishing leaves its entries behind until the registry
/// is reset by the next local publish, so the view is best-effort, not
/// guaranteed fresh.
#[derive(Default)]
pub struct RemoteRegistry {
    entries: RwLock<Vec<RemoteSnapshot>>,
}

impl RemoteRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a snapshot, replacing any prior entry with the same id.
    /// Last-writer-wins; fields are never merged.
    pub fn upsert(&self, snapshot: RemoteSnapshot) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.id != snapshot.id);
        entries.push(snapshot);
    }

    /// Point-in-time copy of the remote view.
    pub fn snapshot(&self) -> Vec<RemoteSnapshot> {
        self.entries.read().clone()
    }

    /// Drop every remote snapshot.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            debug!(count = entries.len(), "resetting remote registry");
        }
        entries.clear();
    }

    /// Number of remote snapshots held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether any peer snapshots are held.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Transport;
    use crate::error::Result;
    use async_trait::async_trait;

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

    fn make_entry(id: &str) -> Arc<ConnectionEntry> {
        Arc::new(ConnectionEntry::new(
            id,
            "10.0.0.1",
            "browser",
            "1.0.0",
            "ws",
            Arc::new(NullTransport),
        ))
    }

    #[test]
    fn add_and_len() {
        let reg = ConnectionRegistry::new();
        assert!(reg.is_empty());
        reg.add(make_entry("c1"));
        reg.add(make_entry("c2"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn remove_by_id() {
        let reg = ConnectionRegistry::new();
        reg.add(make_entry("c1"));
        reg.add(make_entry("c2"));
        assert!(reg.remove("c1"));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("c1").is_none());
        assert!(reg.get("c2").is_some());
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = ConnectionRegistry::new();
        reg.add(make_entry("c1"));
        assert!(reg.remove("c1"));
        assert!(!reg.remove("c1"));
        assert!(!reg.remove("never_existed"));
    }

    #[test]
    fn snapshot_is_stable_under_mutation() {
        let reg = ConnectionRegistry::new();
        reg.add(make_entry("c1"));
        reg.add(make_entry("c2"));
        let snap = reg.snapshot();
        reg.add(make_entry("c3"));
        assert!(reg.remove("c1"));
        // The snapshot still holds the view taken before the mutations.
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id, "c1");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let reg = ConnectionRegistry::new();
        for id in ["a", "b", "c"] {
            reg.add(make_entry(id));
        }
        let ids: Vec<_> = reg.snapshot().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn removal_during_reverse_walk() {
        let reg = ConnectionRegistry::new();
        for id in ["a", "b", "c", "d"] {
            reg.add(make_entry(id));
        }
        let snap = reg.snapshot();
        for entry in snap.iter().rev() {
            if entry.id == "b" || entry.id == "d" {
                assert!(reg.remove(&entry.id));
            }
        }
        let ids: Vec<_> = reg.snapshot().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn note_attempt_counts_per_ip() {
        let reg = ConnectionRegistry::new();
        reg.note_attempt("10.0.0.1");
        reg.note_attempt("10.0.0.1");
        reg.note_attempt("10.0.0.2");
        let attempts = reg.attempts_by_ip();
        assert_eq!(attempts.get("10.0.0.1"), Some(&2));
        assert_eq!(attempts.get("10.0.0.2"), Some(&1));
    }

    fn make_snapshot(id: &str, version: &str) -> RemoteSnapshot {
        RemoteSnapshot {
            id: id.into(),
            hostname: "node-a".into(),
            name: format!("alice/browser/{id}"),
            agent: "browser".into(),
            version: version.into(),
            protocol: "ws".into(),
            remote_ip: "10.0.0.1".into(),
            username: "alice".into(),
            user: None,
            exchanges: vec![],
            queues: vec![],
            watch_count: 0,
            created: Utc::now(),
            last_heartbeat: Utc::now(),
        }
    }

    #[test]
    fn upsert_inserts_new() {
        let reg = RemoteRegistry::new();
        reg.upsert(make_snapshot("x1", "1.0.0"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn upsert_is_last_writer_wins() {
        let reg = RemoteRegistry::new();
        reg.upsert(make_snapshot("x1", "1.0.0"));
        reg.upsert(make_snapshot("x1", "2.0.0"));
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].version, "2.0.0");
    }

    #[test]
    fn upsert_does_not_touch_other_ids() {
        let reg = RemoteRegistry::new();
        reg.upsert(make_snapshot("x1", "1.0.0"));
        reg.upsert(make_snapshot("x2", "1.0.0"));
        reg.upsert(make_snapshot("x1", "3.0.0"));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn clear_empties_registry() {
        let reg = RemoteRegistry::new();
        reg.upsert(make_snapshot("x1", "1.0.0"));
        reg.upsert(make_snapshot("x2", "1.0.0"));
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn from_entry_composes_name() {
        let entry = make_entry("c9");
        entry.bind_user(BoundUser {
            id: "u1".into(),
            name: "alice".into(),
            acl: serde_json::Value::Null,
        });
        let snap = RemoteSnapshot::from_entry(&entry, "node-a");
        assert_eq!(snap.name, "alice/browser/c9");
        assert_eq!(snap.hostname, "node-a");
        assert_eq!(snap.username, "alice");
    }

    #[test]
    fn from_entry_anonymous_name_has_no_leading_slash() {
        let entry = make_entry("c9");
        let snap = RemoteSnapshot::from_entry(&entry, "node-a");
        assert_eq!(snap.name, "browser/c9");
        assert_eq!(snap.username, "");
        assert!(snap.user.is_none());
    }

    #[test]
    fn remote_snapshot_serde_roundtrip() {
        let snap = make_snapshot("x1", "1.0.0");
        let json = serde_json::to_string(&snap).unwrap();
        let back: RemoteSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "x1");
        assert_eq!(back.hostname, "node-a");
        assert_eq!(back.version, "1.0.0");
    }
}
