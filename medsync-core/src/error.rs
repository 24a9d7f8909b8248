//! Error taxonomy shared by every sync-layer component.

use thiserror::Error;

/// Errors raised by the store, the remote client and the sync engine.
///
/// Read paths degrade to cached data on `Network`; write paths keep the
/// mutation queued and surface the error through the failed queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Local persistence failed. Fatal to the operation, never retried.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote unreachable or returned a transient failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote rejected a replayed mutation (e.g. entity deleted remotely).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed payload or response.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote API has no server URL configured.
    #[error("Remote not configured. Add remote.server_url to config.")]
    NotConfigured,
}

impl SyncError {
    /// Returns true if a replay that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::NotConfigured)
    }

    /// Short machine-friendly kind name, stored alongside failed mutations.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Storage(_) => "storage",
            SyncError::Network(_) => "network",
            SyncError::Conflict(_) => "conflict",
            SyncError::Validation(_) => "validation",
            SyncError::NotConfigured => "not_configured",
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Validation(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Network("timeout".into()).is_retryable());
        assert!(!SyncError::Conflict("gone".into()).is_retryable());
        assert!(!SyncError::Validation("bad".into()).is_retryable());
        assert!(!SyncError::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn test_json_error_is_validation() {
        let err: SyncError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_display() {
        let err = SyncError::Conflict("patient srv-1 not found".into());
        assert_eq!(err.to_string(), "Conflict: patient srv-1 not found");
    }
}
