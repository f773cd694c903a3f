//! Push transport
//!
//! The transport that actually talks to the remote store lives outside this
//! crate. It only has to push a batch of records and report failures, ideally
//! with a typed code.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::records::PatientRecord;

/// Pushes records to the remote store
///
/// Implementations must be idempotent: a push re-sends full record state, and
/// the dispatcher may repeat it after a timeout whose outcome is unknown.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn sync_patients(&self, records: &[PatientRecord]) -> Result<(), TransportError>;
}

/// Failure codes a transport can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportErrorCode {
    PermissionDenied,
    Unauthenticated,
    InvalidArgument,
    Forbidden,
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
    Internal,
    Unknown,
}

impl TransportErrorCode {
    /// Auth, permission and validation failures never succeed on retry
    pub fn is_non_retryable(&self) -> bool {
        matches!(
            self,
            TransportErrorCode::PermissionDenied
                | TransportErrorCode::Unauthenticated
                | TransportErrorCode::InvalidArgument
                | TransportErrorCode::Forbidden
        )
    }
}

/// Message fragments that mark a rejection as permanent.
///
/// Only consulted when the transport gives no code. Substring matching can
/// both miss unfamiliar backend wording and catch unrelated text; prefer
/// reporting a [`TransportErrorCode`].
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "permission-denied",
    "permission_denied",
    "unauthenticated",
    "invalid-argument",
    "invalid_argument",
    "forbidden",
    "insufficient permission",
];

/// Error reported by a push transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<TransportErrorCode>,
    pub message: String,
}

impl TransportError {
    /// Error known only by its message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: TransportErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Whether retrying this push is pointless.
    ///
    /// A typed code decides on its own; the message patterns are a fallback.
    pub fn is_non_retryable(&self) -> bool {
        match self.code {
            Some(code) => code.is_non_retryable(),
            None => message_is_non_retryable(&self.message),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportError {}

fn message_is_non_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    NON_RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}
