//! Signed webhook builders.
//!
//! Bodies are signed exactly as sent, so a test that edits the body after
//! `build` gets a request the authenticator must reject.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request},
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use ferry_core::{crypto, ObjectEvent};
use serde_json::Value;

/// A webhook body plus the headers the notifier would send with it.
#[derive(Debug, Clone)]
pub struct SignedWebhook {
    /// Raw body bytes.
    pub body: Bytes,
    /// `X-API-Key`, `X-Signature`, `X-Timestamp`, `Content-Type`.
    pub headers: HeaderMap,
}

impl SignedWebhook {
    /// Builds a `POST /webhook/{relay_name}` request.
    pub fn request(&self, relay_name: &str) -> Request<Body> {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhook/{relay_name}"))
            .body(Body::from(self.body.clone()))
            .unwrap();
        request.headers_mut().extend(self.headers.clone());
        request
    }

    /// Replaces the body without re-signing.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces one header.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.insert(name, HeaderValue::from_str(value).unwrap());
        self
    }

    /// Removes one header.
    #[must_use]
    pub fn without_header(mut self, name: &'static str) -> Self {
        self.headers.remove(name);
        self
    }
}

/// Builder for object events and their signed webhooks.
///
/// Defaults describe `uploads/report.csv` in bucket `b`, 1024 bytes,
/// created at the given instant with a fifteen minute capability.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: ObjectEvent,
    api_key: String,
    signing_key: String,
    sent_at: DateTime<Utc>,
}

impl EventBuilder {
    /// Starts from the default event created at `created_at`.
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            event: ObjectEvent {
                event_id: "e1".to_string(),
                created_at,
                bucket: "b".to_string(),
                key: "uploads/report.csv".to_string(),
                size: 1024,
                etag: "abc".to_string(),
                presigned_url: object_url("uploads/report.csv"),
                expires_at: created_at + Duration::minutes(15),
            },
            api_key: crate::API_KEY.to_string(),
            signing_key: crate::SIGNING_KEY.to_string(),
            sent_at: created_at,
        }
    }

    /// Sets the event id.
    #[must_use]
    pub fn event_id(mut self, id: impl Into<String>) -> Self {
        self.event.event_id = id.into();
        self
    }

    /// Sets the object key and points the capability URL at it.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.event.key = key.into();
        self.event.presigned_url = object_url(&self.event.key);
        self
    }

    /// Sets the announced size.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.event.size = size;
        self
    }

    /// Overrides the capability URL.
    #[must_use]
    pub fn presigned_url(mut self, url: impl Into<String>) -> Self {
        self.event.presigned_url = url.into();
        self
    }

    /// Sets the signed capability expiry.
    #[must_use]
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.event.expires_at = at;
        self
    }

    /// Signs with a different key.
    #[must_use]
    pub fn signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = key.into();
        self
    }

    /// Sends a different API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Sets the `X-Timestamp` value.
    #[must_use]
    pub fn sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.sent_at = at;
        self
    }

    /// The event as built so far.
    pub fn event(&self) -> &ObjectEvent {
        &self.event
    }

    /// Signs the canonical wire bytes of the event.
    pub fn build(&self) -> SignedWebhook {
        let body = self.event.to_wire_bytes().unwrap();
        self.sign(body)
    }

    /// Signs the event's JSON with `field` removed.
    pub fn build_without(&self, field: &str) -> SignedWebhook {
        let mut value = serde_json::to_value(&self.event).unwrap();
        if let Value::Object(map) = &mut value {
            map.remove(field);
        }
        self.sign(serde_json::to_vec(&value).unwrap())
    }

    /// Signs arbitrary bytes with this builder's keys and timestamp.
    pub fn sign(&self, body: impl Into<Bytes>) -> SignedWebhook {
        let body = body.into();
        let signature = crypto::sign_hex(&body, &self.signing_key).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key).unwrap());
        headers.insert("x-signature", HeaderValue::from_str(&signature).unwrap());
        headers.insert("x-timestamp", HeaderValue::from_str(&self.sent_at.to_rfc3339()).unwrap());

        SignedWebhook { body, headers }
    }
}

/// Capability URL the default fixtures use for `key`.
pub fn object_url(key: &str) -> String {
    format!("https://b.s3.eu-west-1.amazonaws.com/{key}?X-Amz-Expires=900&X-Amz-Signature=test")
}
