//! Inbound webhook authentication.
//!
//! Three checks, all required, all evaluated before the body is parsed:
//! the HMAC over the raw body bytes, the static API key, and the freshness
//! of `X-Timestamp`. Failures are logged at `warn` with the failing check
//! and never with secret material.
//!
//! The signature covers the body only, so `X-Timestamp` alone cannot stop a
//! captured request from being replayed with a fresh header. The signed
//! `expiresAt` can: once the body has parsed, an event whose capability has
//! already expired is rejected as an authentication failure too.

use std::{sync::Arc, time::Duration};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use ferry_core::{
    crypto::{self, SignatureError},
    Clock, RelayCredentials, RelayError,
};
use tracing::warn;

/// Header carrying the hex HMAC of the body.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Header carrying the static API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying the RFC 3339 send time.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// How far into the future a timestamp may be before it is rejected.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Verifies that a webhook came from a holder of the relay secrets.
#[derive(Debug, Clone)]
pub struct WebhookAuthenticator {
    credentials: Arc<RelayCredentials>,
    replay_window: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl WebhookAuthenticator {
    /// Creates an authenticator without a replay window.
    pub fn new(credentials: Arc<RelayCredentials>, clock: Arc<dyn Clock>) -> Self {
        Self { credentials, replay_window: None, clock }
    }

    /// Rejects timestamps older than `window`. `None` disables the check.
    #[must_use]
    pub fn with_replay_window(mut self, window: Option<Duration>) -> Self {
        self.replay_window = window;
        self
    }

    /// Runs every check against the raw request.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Authentication` naming the first failed check.
    pub fn authenticate(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), RelayError> {
        self.check_signature(headers, body)?;
        self.check_api_key(headers)?;
        self.check_timestamp(headers)
    }

    fn check_signature(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), RelayError> {
        let signature = header_str(headers, SIGNATURE_HEADER).unwrap_or_default();

        crypto::verify_hex(body, signature, &self.credentials.signing_key).map_err(|e| {
            warn!(check = "signature", reason = %e, "webhook authentication failed");
            match e {
                SignatureError::MissingSignature => RelayError::authentication("missing signature"),
                SignatureError::InvalidFormat(_) => RelayError::authentication("malformed signature"),
                SignatureError::VerificationFailed | SignatureError::InvalidSecret => {
                    RelayError::authentication("invalid signature")
                },
            }
        })
    }

    fn check_api_key(&self, headers: &HeaderMap) -> Result<(), RelayError> {
        let provided = header_str(headers, API_KEY_HEADER).unwrap_or_default();

        if provided.is_empty() {
            warn!(check = "api_key", reason = "missing", "webhook authentication failed");
            return Err(RelayError::authentication("missing API key"));
        }
        if !crypto::constant_time_eq(provided.as_bytes(), self.credentials.api_key.as_bytes()) {
            warn!(check = "api_key", reason = "mismatch", "webhook authentication failed");
            return Err(RelayError::authentication("invalid API key"));
        }
        Ok(())
    }

    fn check_timestamp(&self, headers: &HeaderMap) -> Result<(), RelayError> {
        let Some(window) = self.replay_window else {
            return Ok(());
        };

        let Some(raw) = header_str(headers, TIMESTAMP_HEADER) else {
            warn!(check = "timestamp", reason = "missing", "webhook authentication failed");
            return Err(RelayError::authentication("missing timestamp"));
        };
        let sent_at = DateTime::parse_from_rfc3339(raw).map_err(|_| {
            warn!(check = "timestamp", reason = "unparsable", "webhook authentication failed");
            RelayError::authentication("malformed timestamp")
        })?;

        let age = self.clock.now_utc().signed_duration_since(sent_at);
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let skew = chrono::Duration::from_std(MAX_CLOCK_SKEW).unwrap_or(chrono::Duration::zero());

        if age > window {
            warn!(check = "timestamp", age_secs = age.num_seconds(), "webhook authentication failed");
            return Err(RelayError::authentication("timestamp outside replay window"));
        }
        if age < -skew {
            warn!(check = "timestamp", age_secs = age.num_seconds(), "webhook authentication failed");
            return Err(RelayError::authentication("timestamp is in the future"));
        }
        Ok(())
    }
}

impl WebhookAuthenticator {
    /// Rejects an event whose signed capability expiry has passed.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Authentication` when `expires_at` is not in the
    /// future.
    pub fn check_capability_expiry(&self, expires_at: DateTime<Utc>) -> Result<(), RelayError> {
        let now = self.clock.now_utc();
        if now >= expires_at {
            warn!(
                check = "expires_at",
                expired_secs = now.signed_duration_since(expires_at).num_seconds(),
                "webhook authentication failed"
            );
            return Err(RelayError::authentication("capability URL has expired"));
        }
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}
