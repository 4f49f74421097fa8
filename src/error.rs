//! Gateway error types.

/// Result alias used throughout the crate.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors raised by the registry, supervisor, and their collaborators.
///
/// Per-entry failures during a sweep are contained to that entry: they are
/// logged, the entry is closed, and the sweep continues. None of these
/// variants is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level failure (ping/close/accept).
    #[error("transport error: {0}")]
    Transport(String),

    /// Token decode or refresh failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// Batched persistence write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cross-instance publish or receive failed.
    #[error("sync error: {0}")]
    Sync(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT validation failed.
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_display() {
        let err = GatewayError::Transport("ping failed".to_string());
        assert_eq!(err.to_string(), "transport error: ping failed");
    }

    #[test]
    fn auth_display() {
        let err = GatewayError::Auth("refresh rejected".to_string());
        assert_eq!(err.to_string(), "auth error: refresh rejected");
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = GatewayError::from(json_err);
        assert!(err.to_string().starts_with("JSON error"));
    }

    #[test]
    fn storage_display() {
        let err = GatewayError::Storage("bulk write timed out".to_string());
        assert!(err.to_string().contains("bulk write timed out"));
    }
}
