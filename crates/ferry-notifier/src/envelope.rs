//! Object-created notifications as delivered by the event bus.
//!
//! ```json
//! {
//!   "id": "17793124-05d4-b198-2fde-7ededc63b103",
//!   "detail-type": "Object Created",
//!   "time": "2024-05-17T08:30:00Z",
//!   "detail": {
//!     "bucket": { "name": "b" },
//!     "object": { "key": "uploads/Q1+report.csv", "size": 1024, "etag": "d41d8cd9" }
//!   }
//! }
//! ```
//!
//! Keys arrive form-encoded: `+` is a space and other bytes are
//! percent-escaped.

use chrono::{DateTime, Utc};
use ferry_core::ObjectCreated;
use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::error::NotifyError;

const OBJECT_CREATED: &str = "Object Created";

/// Outer bus envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct BusEnvelope {
    /// Delivery identifier, reused as the event id.
    pub id: String,
    /// Event kind; only object creation is handled.
    #[serde(rename = "detail-type", default)]
    pub detail_type: Option<String>,
    /// When the object was created.
    pub time: DateTime<Utc>,
    /// Bucket and object description.
    pub detail: BusDetail,
}

/// `detail` section of the envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct BusDetail {
    /// Bucket the object was written to.
    pub bucket: BusBucket,
    /// The object itself.
    pub object: BusObject,
}

/// `detail.bucket`.
#[derive(Debug, Clone, Deserialize)]
pub struct BusBucket {
    /// Bucket name.
    pub name: String,
}

/// `detail.object`.
#[derive(Debug, Clone, Deserialize)]
pub struct BusObject {
    /// Form-encoded object key.
    pub key: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Entity tag.
    #[serde(default)]
    pub etag: String,
}

impl BusEnvelope {
    /// Parses a raw envelope.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidEvent` for malformed JSON or missing
    /// fields.
    pub fn parse(raw: &[u8]) -> Result<Self, NotifyError> {
        serde_json::from_slice(raw)
            .map_err(|e| NotifyError::invalid_event(format!("unreadable bus envelope: {e}")))
    }

    /// Converts to the notifier's event type, decoding the key.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidEvent` for non-creation events, empty
    /// objects, directory markers, and keys that do not decode to UTF-8.
    pub fn into_object(self) -> Result<ObjectCreated, NotifyError> {
        if let Some(kind) = &self.detail_type {
            if kind != OBJECT_CREATED {
                return Err(NotifyError::invalid_event(format!("unsupported event type: {kind}")));
            }
        }

        let key = decode_key(&self.detail.object.key)?;
        if key.is_empty() || key.ends_with('/') {
            return Err(NotifyError::invalid_event(format!("not a file object: {key:?}")));
        }
        if self.detail.object.size == 0 {
            return Err(NotifyError::invalid_event(format!("object {key} is empty")));
        }

        Ok(ObjectCreated {
            event_id: self.id,
            created_at: self.time,
            bucket: self.detail.bucket.name,
            key,
            size: self.detail.object.size,
            etag: self.detail.object.etag,
        })
    }
}

/// Decodes a form-encoded object key.
///
/// # Errors
///
/// Returns `NotifyError::InvalidEvent` if the bytes are not UTF-8.
pub fn decode_key(raw: &str) -> Result<String, NotifyError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| NotifyError::invalid_event(format!("object key is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(key: &str, size: u64, detail_type: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "e1",
            "detail-type": detail_type,
            "time": "2024-05-17T08:30:00Z",
            "detail": {
                "bucket": { "name": "b" },
                "object": { "key": key, "size": size, "etag": "abc" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_object_created() {
        let object = BusEnvelope::parse(&envelope("uploads/report.csv", 1024, "Object Created"))
            .unwrap()
            .into_object()
            .unwrap();

        assert_eq!(object.event_id, "e1");
        assert_eq!(object.bucket, "b");
        assert_eq!(object.key, "uploads/report.csv");
        assert_eq!(object.size, 1024);
        assert_eq!(object.created_at.to_rfc3339(), "2024-05-17T08:30:00+00:00");
    }

    #[test]
    fn keys_are_form_decoded() {
        assert_eq!(decode_key("uploads/Q1+report%282%29.csv").unwrap(), "uploads/Q1 report(2).csv");
        assert_eq!(decode_key("a%2Bb.txt").unwrap(), "a+b.txt");
        assert_eq!(decode_key("caf%C3%A9.txt").unwrap(), "café.txt");
        assert!(decode_key("bad%FF.txt").is_err());
    }

    #[test]
    fn other_event_types_are_rejected() {
        let result =
            BusEnvelope::parse(&envelope("k.txt", 10, "Object Deleted")).unwrap().into_object();
        assert!(matches!(result, Err(NotifyError::InvalidEvent { .. })));
    }

    #[test]
    fn empty_objects_and_folders_are_rejected() {
        for (key, size) in [("k.txt", 0), ("folder/", 10)] {
            let result =
                BusEnvelope::parse(&envelope(key, size, "Object Created")).unwrap().into_object();
            assert!(result.is_err(), "{key} / {size}");
        }
    }

    #[test]
    fn malformed_envelope_is_invalid_event() {
        assert!(matches!(BusEnvelope::parse(b"{}"), Err(NotifyError::InvalidEvent { .. })));
    }
}
