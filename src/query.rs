//! Access-controlled queries over the combined registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::auth::{Authorizer, Requester};
use crate::connection::ConnectionEntry;
use crate::registry::{ConnectionRegistry, RemoteRegistry, RemoteSnapshot};

/// One connection as reported to API consumers.
///
/// Field names are normalized for external consumption (`agent`, `version`)
/// and no access-control material is carried: the strip is structural, this
/// type simply has no acl field.
#[derive(Debug, Clone, Serialize)]
pub struct VisibleClient {
    /// Connection id.
    pub id: String,
    /// Composed display name: `username/agent/id`.
    pub name: String,
    /// Hostname of the owning instance, `None` for local entries.
    pub hostname: Option<String>,
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
    /// Id of the bound user, if signed in.
    pub user_id: Option<String>,
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

impl VisibleClient {
    fn from_local(entry: &ConnectionEntry) -> Self {
        let username = entry.username();
        let name = format!("{}/{}/{}", username, entry.agent, entry.id)
            .trim_matches('/')
            .to_string();
        Self {
            id: entry.id.clone(),
            name,
            hostname: None,
            agent: entry.agent.clone(),
            version: entry.version.clone(),
            protocol: entry.protocol.clone(),
            remote_ip: entry.remote_ip.clone(),
            username,
            user_id: entry.user().map(|u| u.id),
            exchanges: entry.exchanges(),
            queues: entry.queues(),
            watch_count: entry.watches().len(),
            created: entry.created,
            last_heartbeat: entry.last_heartbeat(),
        }
    }

    fn from_remote(snapshot: &RemoteSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            hostname: Some(snapshot.hostname.clone()),
            agent: snapshot.agent.clone(),
            version: snapshot.version.clone(),
            protocol: snapshot.protocol.clone(),
            remote_ip: snapshot.remote_ip.clone(),
            username: snapshot.username.clone(),
            user_id: snapshot.user.as_ref().map(|u| u.id.clone()),
            exchanges: snapshot.exchanges.clone(),
            queues: snapshot.queues.clone(),
            watch_count: snapshot.watch_count,
            created: snapshot.created,
            last_heartbeat: snapshot.last_heartbeat,
        }
    }
}

/// Answers "list visible connections for requester X".
pub struct ClientQuery {
    local: Arc<ConnectionRegistry>,
    remote: Arc<RemoteRegistry>,
    authorizer: Arc<dyn Authorizer>,
    distributed: bool,
}

impl ClientQuery {
    /// Create a query surface over both registries.
    pub fn new(
        local: Arc<ConnectionRegistry>,
        remote: Arc<RemoteRegistry>,
        authorizer: Arc<dyn Authorizer>,
        distributed: bool,
    ) -> Self {
        Self {
            local,
            remote,
            authorizer,
            distributed,
        }
    }

    /// List the connections `requester` is allowed to see.
    ///
    /// In distributed mode with a populated remote registry the fleet-wide
    /// view is used; otherwise the local registry. A connection with a bound
    /// user is visible only with read authorization over that user; an
    /// anonymous connection only to administrators.
    pub fn list_visible(&self, requester: &Requester) -> Vec<VisibleClient> {
        let mut result = Vec::new();
        if self.distributed && !self.remote.is_empty() {
            for snapshot in self.remote.snapshot() {
                let visible = match &snapshot.user {
                    Some(user) => self.authorizer.has_read_authorization(requester, user),
                    None => self.authorizer.has_admin_role(requester),
                };
                if visible {
                    result.push(VisibleClient::from_remote(&snapshot));
                }
            }
        } else {
            for entry in self.local.snapshot() {
                let visible = match entry.user() {
                    Some(user) => self.authorizer.has_read_authorization(requester, &user),
                    None => self.authorizer.has_admin_role(requester),
                };
                if visible {
                    result.push(VisibleClient::from_local(&entry));
                }
            }
        }
        debug!(requester = %requester.id, count = result.len(), "listed visible clients");
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
