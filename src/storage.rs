//! Batched last-seen persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One "user X was last seen at T" write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastSeenUpdate {
    /// Id of the authenticated user.
    pub user_id: String,
    /// Heartbeat timestamp to persist.
    pub last_seen: DateTime<Utc>,
}

/// Storage collaborator for last-seen bookkeeping.
///
/// Called by the supervisor only with a non-empty batch and at most once per
/// flush window; a failed flush drops the batch for that cycle and is retried
/// naturally on the next qualifying sweep.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upsert the given batch of last-seen timestamps.
    async fn batch_upsert_last_seen(&self, updates: Vec<LastSeenUpdate>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_serde_roundtrip() {
        let update = LastSeenUpdate {
            user_id: "u1".into(),
            last_seen: Utc::now(),
        };
        let json = serde_json::to_string(&update).unwrap();
        let back: LastSeenUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, "u1");
        assert_eq!(back.last_seen, update.last_seen);
    }
}
