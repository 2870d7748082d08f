//! Error taxonomy for the receiving side of the relay.
//!
//! Every failure a webhook request can hit maps to one variant here, with a
//! stable code for operators and an HTTP status for the endpoint layer.
//! Authentication and validation failures are terminal for the request.
//! Transfer failures are reported as server errors so the producer's retry
//! loop redelivers the whole event.

use std::fmt;

use thiserror::Error;

/// Result type alias using `RelayError`.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Pipeline stage a transfer was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStage {
    /// Signature, API key, and freshness checks.
    Authenticate,
    /// Payload parsing and required-field checks.
    Validate,
    /// Download through the capability URL.
    Fetch,
    /// Session establishment with the destination file server.
    Connect,
    /// Directory creation and stream copy to the remote file.
    Upload,
    /// Session teardown.
    Close,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticate => write!(f, "authenticate"),
            Self::Validate => write!(f, "validate"),
            Self::Fetch => write!(f, "fetch"),
            Self::Connect => write!(f, "connect"),
            Self::Upload => write!(f, "upload"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Errors surfaced by the receiving pipeline.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// Signature, API key, or timestamp check failed (E1001).
    #[error("[E1001] authentication failed: {reason}")]
    Authentication {
        /// Which check failed; never contains secret material
        reason: String,
    },

    /// Payload is malformed or missing a required field (E1002).
    #[error("[E1002] invalid payload: {message}")]
    Validation {
        /// Description of the offending field
        message: String,
    },

    /// Download or upload failed (E2001).
    #[error("[E2001] transfer failed during {stage}: {message}")]
    Transfer {
        /// Stage that failed
        stage: TransferStage,
        /// Underlying cause with remote path or URL context
        message: String,
    },

    /// Unexpected failure, including recovered panics (E3001).
    #[error("[E3001] internal error: {message}")]
    Internal {
        /// Error description
        message: String,
    },
}

impl RelayError {
    /// Creates an authentication error.
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication { reason: reason.into() }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a transfer error for the given stage.
    pub fn transfer(stage: TransferStage, message: impl Into<String>) -> Self {
        Self::Transfer { stage, message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns the stable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "E1001",
            Self::Validation { .. } => "E1002",
            Self::Transfer { .. } => "E2001",
            Self::Internal { .. } => "E3001",
        }
    }

    /// Short machine-readable label used as the `error` field of responses.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "unauthorized",
            Self::Validation { .. } => "invalid_payload",
            Self::Transfer { .. } => "transfer_failed",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status code the endpoint answers with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Authentication { .. } => 401,
            Self::Validation { .. } => 400,
            Self::Transfer { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Stage the failure belongs to, when it is part of the pipeline.
    pub const fn stage(&self) -> Option<TransferStage> {
        match self {
            Self::Authentication { .. } => Some(TransferStage::Authenticate),
            Self::Validation { .. } => Some(TransferStage::Validate),
            Self::Transfer { stage, .. } => Some(*stage),
            Self::Internal { .. } => None,
        }
    }

    /// Whether the producer should redeliver the event after this error.
    ///
    /// Only transfer and internal failures are worth a redelivery; a bad
    /// signature or payload fails the same way every time.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer { .. } | Self::Internal { .. })
    }
}
