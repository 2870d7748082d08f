//! Where events go once delivery is exhausted.

use std::{fmt, future::Future, pin::Pin};

use chrono::{DateTime, Utc};
use ferry_core::ObjectEvent;
use serde::Serialize;
use tracing::error;
use url::Url;

use crate::notifier::NotifierState;

/// An event that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// The signed event as it was sent.
    pub event: ObjectEvent,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error from the last attempt.
    pub reason: String,
    /// When the notifier gave up.
    pub failed_at: DateTime<Utc>,
    /// Every state passed through, ending in `Exhausted`.
    pub history: Vec<NotifierState>,
}

impl DeadLetter {
    /// JSON form safe for logs: the capability URL loses its query string,
    /// which holds the signature.
    pub fn redacted_json(&self) -> String {
        let mut letter = self.clone();
        letter.event.presigned_url = strip_query(&letter.event.presigned_url);
        serde_json::to_string(&letter).unwrap_or_default()
    }
}

fn strip_query(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.to_string()
        },
        Err(_) => "<redacted>".to_string(),
    }
}

/// Receives undeliverable events.
pub trait DeadLetterSink: Send + Sync + fmt::Debug {
    /// Records one dead letter. Must not fail; sinks log their own errors.
    fn publish(&self, letter: DeadLetter) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Writes dead letters to the error log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDeadLetterSink;

impl DeadLetterSink for LogDeadLetterSink {
    fn publish(&self, letter: DeadLetter) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let payload = letter.redacted_json();
            error!(
                event_id = %letter.event.event_id,
                key = %letter.event.key,
                attempts = letter.attempts,
                reason = %letter.reason,
                dead_letter = %payload,
                "webhook delivery exhausted"
            );
        })
    }
}
