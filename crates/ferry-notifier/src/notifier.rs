//! One invocation of the producer: event in, webhook out.

use std::{fmt, sync::Arc, time::Duration};

use ferry_core::{Clock, ObjectCreated, ObjectEvent};
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::{
    client::WebhookClient,
    config::NotifierConfig,
    credentials::CredentialStore,
    dead_letter::{DeadLetter, DeadLetterSink, LogDeadLetterSink},
    dispatcher::WebhookDispatcher,
    error::{NotifyError, Result},
    presign::Presigner,
};

/// Progress of one event through the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierState {
    /// Event accepted for processing.
    Received,
    /// Capability URL minted.
    UrlGenerated,
    /// Sending the given attempt.
    Dispatching {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Receiver answered 2xx.
    Delivered,
    /// Attempt budget spent.
    Exhausted,
}

impl fmt::Display for NotifierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::UrlGenerated => write!(f, "url_generated"),
            Self::Dispatching { attempt } => write!(f, "dispatching({attempt})"),
            Self::Delivered => write!(f, "delivered"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Result of a delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Event that was delivered.
    pub event_id: String,
    /// Final state, always `Delivered`.
    pub state: NotifierState,
    /// Attempts used.
    pub attempts: u32,
    /// Every state passed through, in order.
    pub history: Vec<NotifierState>,
}

/// Producer entry point.
#[derive(Debug, Clone)]
pub struct Notifier {
    credentials: Arc<CredentialStore>,
    presigner: Arc<dyn Presigner>,
    dispatcher: WebhookDispatcher,
    dead_letter: Arc<dyn DeadLetterSink>,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    /// Assembles a notifier from its parts.
    pub fn new(
        credentials: Arc<CredentialStore>,
        presigner: Arc<dyn Presigner>,
        dispatcher: WebhookDispatcher,
        dead_letter: Arc<dyn DeadLetterSink>,
        validity: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { credentials, presigner, dispatcher, dead_letter, validity, clock }
    }

    /// Builds a notifier from configuration, logging dead letters.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Configuration` or `NotifyError::Presign` when
    /// the configuration cannot produce a working client or presigner.
    pub fn from_config(config: &NotifierConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = WebhookClient::new(config.to_client_config())?;
        let presigner = config.presigner(Arc::clone(&clock))?;
        let credentials = Arc::new(CredentialStore::new(config.credential_source()));

        Ok(Self::new(
            credentials,
            Arc::new(presigner),
            WebhookDispatcher::new(client, config.to_retry_policy(), Arc::clone(&clock)),
            Arc::new(LogDeadLetterSink),
            config.presign_validity(),
            clock,
        ))
    }

    /// Shared credential store, for callers that want to force a reload.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Handles one object-created event end to end.
    ///
    /// # Errors
    ///
    /// - `Credentials` / `Presign` before anything is sent
    /// - `RetriesExhausted` after the event has been dead-lettered
    pub async fn handle(&self, object: ObjectCreated) -> Result<NotifyOutcome> {
        let span = info_span!(
            "notify",
            event_id = %object.event_id,
            bucket = %object.bucket,
            key = %object.key,
            size = object.size,
        );

        async move {
            let mut history = vec![NotifierState::Received];

            let credentials = self.credentials.get().await?;
            let capability = self.presigner.presign_get(&object.bucket, &object.key, self.validity)?;
            history.push(NotifierState::UrlGenerated);
            info!(expires_at = %capability.expires_at, "capability URL generated");

            let event = ObjectEvent::new(object, capability);
            let result = self
                .dispatcher
                .dispatch_with(&event, &credentials, &mut |attempt| {
                    history.push(NotifierState::Dispatching { attempt });
                })
                .await;

            match result {
                Ok(report) => {
                    history.push(NotifierState::Delivered);
                    Ok(NotifyOutcome {
                        event_id: event.event_id,
                        state: NotifierState::Delivered,
                        attempts: report.attempts,
                        history,
                    })
                },
                Err(NotifyError::RetriesExhausted { attempts, last_error }) => {
                    history.push(NotifierState::Exhausted);
                    self.dead_letter
                        .publish(DeadLetter {
                            event,
                            attempts,
                            reason: last_error.to_string(),
                            failed_at: self.clock.now_utc(),
                            history,
                        })
                        .await;
                    Err(NotifyError::RetriesExhausted { attempts, last_error })
                },
                Err(other) => Err(other),
            }
        }
        .instrument(span)
        .await
    }
}
