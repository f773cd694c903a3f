//! Error types for the patient sync engine

use thiserror::Error;

use crate::sync::TransportError;

/// Sync-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Sync error type
///
/// Reconciliation never produces one of these: divergence, ties and dropouts
/// are encoded in its outcome. Only the dispatcher and the coordinator fail.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid sync configuration: {0}")]
    Configuration(String),

    #[error("Push attempt timed out after {timeout_ms}ms")]
    AttemptTimeout { timeout_ms: u64 },

    #[error("Push rejected by remote: {0}")]
    NonRetryable(TransportError),

    #[error("Push failed: {0}")]
    Transient(TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether another push attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::AttemptTimeout { .. } | SyncError::Transient(_)
        )
    }

    /// Classify a transport failure into the retry taxonomy
    pub fn from_transport(err: TransportError) -> Self {
        if err.is_non_retryable() {
            SyncError::NonRetryable(err)
        } else {
            SyncError::Transient(err)
        }
    }
}

/// Authoritative store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Unknown tie policy: {0}")]
    UnknownTiePolicy(String),

    #[error(transparent)]
    Retry(#[from] SyncError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::TransportErrorCode;

    #[test]
    fn test_retryable_variants() {
        assert!(SyncError::AttemptTimeout { timeout_ms: 50 }.is_retryable());
        assert!(SyncError::Transient(TransportError::new("socket hang up")).is_retryable());
        assert!(!SyncError::Configuration("bad".to_string()).is_retryable());
        assert!(
            !SyncError::NonRetryable(TransportError::new("permission-denied")).is_retryable()
        );
    }

    #[test]
    fn test_from_transport_classifies() {
        let err = SyncError::from_transport(TransportError::with_code(
            TransportErrorCode::Unauthenticated,
            "token expired",
        ));
        assert!(matches!(err, SyncError::NonRetryable(_)));

        let err = SyncError::from_transport(TransportError::new("deadline exceeded"));
        assert!(matches!(err, SyncError::Transient(_)));
    }

    #[test]
    fn test_timeout_message_contains_duration() {
        let err = SyncError::AttemptTimeout { timeout_ms: 1500 };
        assert!(err.to_string().contains("1500ms"));
    }
}
