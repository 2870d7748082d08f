//! Relay data model.
//!
//! `ObjectEvent` is the immutable record that travels from the notifier to
//! the receiver. Its serde field order is the canonical wire order, so the
//! bytes produced by `to_wire_bytes` are exactly the bytes that get signed.
//! `IncomingPayload` is the permissive receiving-side view used to report
//! which required field is missing instead of failing with a parser error.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// An object-created notification, before a capability URL is minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    /// Opaque delivery identifier from the notification bus.
    pub event_id: String,
    /// When the object was created.
    pub created_at: DateTime<Utc>,
    /// Bucket (container) holding the object.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
    /// Object size in bytes; always positive.
    pub size: u64,
    /// Content fingerprint reported by the store.
    pub etag: String,
}

/// A time-boxed, read-only URL for exactly one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityUrl {
    /// The presigned URL.
    pub url: String,
    /// Absolute instant after which the URL is refused.
    pub expires_at: DateTime<Utc>,
}

/// Signed webhook payload describing one stored object.
///
/// Field order here is the wire order: `eventId`, `timestamp`, `bucket`,
/// `key`, `size`, `etag`, `presignedUrl`, `expiresAt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEvent {
    /// Opaque delivery identifier.
    pub event_id: String,
    /// Object creation time.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Bucket (container) holding the object.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Content fingerprint.
    pub etag: String,
    /// Capability URL for downloading the object.
    pub presigned_url: String,
    /// When the capability URL stops working.
    pub expires_at: DateTime<Utc>,
}

impl ObjectEvent {
    /// Combines an object notification with the capability minted for it.
    pub fn new(object: ObjectCreated, capability: CapabilityUrl) -> Self {
        Self {
            event_id: object.event_id,
            created_at: object.created_at,
            bucket: object.bucket,
            key: object.key,
            size: object.size,
            etag: object.etag,
            presigned_url: capability.url,
            expires_at: capability.expires_at,
        }
    }

    /// Serializes to the canonical compact JSON that is signed and sent.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only happens on allocation
    /// failure for this type.
    pub fn to_wire_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        base_name(&self.key)
    }
}

fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Receiving-side view of a webhook body with every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPayload {
    /// `eventId`
    pub event_id: Option<String>,
    /// `timestamp`, RFC 3339
    pub timestamp: Option<String>,
    /// `bucket`
    pub bucket: Option<String>,
    /// `key`
    pub key: Option<String>,
    /// `size`
    pub size: Option<i64>,
    /// `etag`
    pub etag: Option<String>,
    /// `presignedUrl`
    pub presigned_url: Option<String>,
    /// `expiresAt`, RFC 3339
    pub expires_at: Option<String>,
}

impl IncomingPayload {
    /// Parses a raw request body.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` when the body is not a JSON object
    /// or a field has the wrong JSON type.
    pub fn parse(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body)
            .map_err(|e| RelayError::validation(format!("malformed JSON payload: {e}")))
    }

    /// Checks required fields and builds the event.
    ///
    /// `eventId`, `bucket`, `key`, `size`, and `presignedUrl` are required.
    /// A missing `timestamp` falls back to `received_at`; a missing
    /// `expiresAt` falls back to the creation time.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Validation` naming the first offending field.
    pub fn into_event(self, received_at: DateTime<Utc>) -> Result<ObjectEvent, RelayError> {
        let event_id = required_text("eventId", self.event_id)?;
        let bucket = required_text("bucket", self.bucket)?;
        let key = required_text("key", self.key)?;
        let presigned_url = required_text("presignedUrl", self.presigned_url)?;

        let size = match self.size {
            None => return Err(RelayError::validation("missing required field: size")),
            Some(size) if size <= 0 => {
                return Err(RelayError::validation(format!("size must be positive, got {size}")))
            },
            Some(size) => u64::try_from(size)
                .map_err(|_| RelayError::validation(format!("size out of range: {size}")))?,
        };

        if matches!(base_name(&key), "" | "." | "..") {
            return Err(RelayError::validation(format!("key has no file name: {key}")));
        }

        let created_at = match self.timestamp {
            Some(raw) => parse_rfc3339("timestamp", &raw)?,
            None => received_at,
        };
        let expires_at = match self.expires_at {
            Some(raw) => parse_rfc3339("expiresAt", &raw)?,
            None => created_at,
        };

        Ok(ObjectEvent {
            event_id,
            created_at,
            bucket,
            key,
            size,
            etag: self.etag.unwrap_or_default(),
            presigned_url,
            expires_at,
        })
    }
}

fn required_text(field: &str, value: Option<String>) -> Result<String, RelayError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(RelayError::validation(format!("field must not be empty: {field}"))),
        None => Err(RelayError::validation(format!("missing required field: {field}"))),
    }
}

fn parse_rfc3339(field: &str, raw: &str) -> Result<DateTime<Utc>, RelayError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RelayError::validation(format!("{field} is not RFC 3339: {e}")))
}

/// Secrets shared by both ends of the relay.
///
/// Loaded once and handed out as read-only state. Rotation means loading a
/// new value through the credential store's reload path.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RelayCredentials {
    /// Where the notifier posts webhooks.
    #[serde(alias = "webhookUrl", alias = "url")]
    pub webhook_url: String,
    /// Static API key sent in `X-API-Key`.
    #[serde(alias = "apiKey")]
    pub api_key: String,
    /// Symmetric HMAC key.
    #[serde(alias = "signingKey", alias = "hmac_secret", alias = "hmacSecret")]
    pub signing_key: String,
}

impl RelayCredentials {
    /// Creates a credential set.
    pub fn new(
        webhook_url: impl Into<String>,
        api_key: impl Into<String>,
        signing_key: impl Into<String>,
    ) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            api_key: api_key.into(),
            signing_key: signing_key.into(),
        }
    }

    /// Names of fields that are present but empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.webhook_url.trim().is_empty() {
            missing.push("webhook_url");
        }
        if self.api_key.is_empty() {
            missing.push("api_key");
        }
        if self.signing_key.is_empty() {
            missing.push("signing_key");
        }
        missing
    }
}

impl fmt::Debug for RelayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCredentials")
            .field("webhook_url", &self.webhook_url)
            .field("api_key", &"***")
            .field("signing_key", &"***")
            .finish()
    }
}

/// Outcome of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Whether the object reached the destination intact.
    pub success: bool,
    /// Destination path the object was written to.
    pub remote_path: String,
    /// Bytes copied to the destination.
    pub bytes_transferred: u64,
    /// Wall-clock time spent on the transfer.
    pub elapsed: Duration,
    /// Failure detail; present exactly when `success` is false.
    pub error: Option<String>,
}

impl TransferResult {
    /// Creates a successful result.
    pub fn succeeded(remote_path: impl Into<String>, bytes_transferred: u64, elapsed: Duration) -> Self {
        Self {
            success: true,
            remote_path: remote_path.into(),
            bytes_transferred,
            elapsed,
            error: None,
        }
    }

    /// Creates a failed result.
    pub fn failed(
        remote_path: impl Into<String>,
        bytes_transferred: u64,
        elapsed: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            remote_path: remote_path.into(),
            bytes_transferred,
            elapsed,
            error: Some(error.into()),
        }
    }
}

/// Acknowledgment returned to the notifier once a transfer is settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    /// `success` when the object was written.
    pub status: String,
    /// Human-readable summary.
    pub message: String,
    /// Echoed object key.
    pub file: String,
    /// When processing finished.
    pub processed_at: DateTime<Utc>,
}

impl RelayResponse {
    /// Builds the acknowledgment for a completed transfer.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` when handed a failed result, since a
    /// failure must never be acknowledged as success.
    pub fn from_result(
        key: &str,
        result: &TransferResult,
        processed_at: DateTime<Utc>,
    ) -> Result<Self, RelayError> {
        if !result.success {
            return Err(RelayError::internal(format!(
                "refusing to acknowledge failed transfer of {key}: {}",
                result.error.as_deref().unwrap_or("unknown error")
            )));
        }

        Ok(Self {
            status: "success".to_string(),
            message: format!(
                "transferred {} bytes to {} in {} ms",
                result.bytes_transferred,
                result.remote_path,
                result.elapsed.as_millis()
            ),
            file: key.to_string(),
            processed_at,
        })
    }
}
