//! Error types for the notifier.
//!
//! `DeliveryError` describes one failed webhook attempt. `NotifyError` is
//! what a whole notifier invocation returns: credential and presigning
//! failures stop the event before any delivery, exhaustion carries the last
//! attempt's error so it can be dead-lettered with context.

use thiserror::Error;

use crate::{credentials::CredentialError, presign::PresignError};

/// Result type alias for notifier operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Failure of a single webhook delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Connection could not be established or broke mid-request.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Request did not complete within the client timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout in seconds
        timeout_seconds: u64,
    },

    /// Receiver answered with a 4xx status.
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body, truncated
        body: String,
    },

    /// Receiver answered with a 5xx or otherwise non-2xx status.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Response body, truncated
        body: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Classifies a non-2xx response.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        if (400..500).contains(&status_code) {
            Self::ClientError { status_code, body: body.into() }
        } else {
            Self::ServerError { status_code, body: body.into() }
        }
    }

    /// HTTP status of the failed attempt, if a response arrived.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. } | Self::ServerError { status_code, .. } => {
                Some(*status_code)
            },
            Self::NetworkError { .. } | Self::Timeout { .. } => None,
        }
    }
}

/// Errors from handling one object-created event.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Relay secrets could not be loaded.
    #[error("credential store error: {0}")]
    Credentials(#[from] CredentialError),

    /// Capability URL could not be minted.
    #[error("capability URL generation failed: {0}")]
    Presign(#[from] PresignError),

    /// The triggering notification is not a usable object-created event.
    #[error("invalid object-created event: {message}")]
    InvalidEvent {
        /// What is wrong with the event
        message: String,
    },

    /// Payload could not be serialized or signed.
    #[error("payload preparation failed: {message}")]
    Payload {
        /// Underlying serialization or signing error
        message: String,
    },

    /// Every delivery attempt failed.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: DeliveryError,
    },

    /// Invalid notifier configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl NotifyError {
    /// Creates an invalid event error.
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent { message: message.into() }
    }

    /// Creates a payload preparation error.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether redelivering the same notification could succeed.
    ///
    /// Malformed events and presigning with a broken identity fail the same
    /// way every time; exhausted delivery and credential loading may not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. } | Self::Credentials(_))
    }
}
