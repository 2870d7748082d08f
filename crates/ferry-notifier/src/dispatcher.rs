//! Signed webhook delivery with bounded exponential backoff.
//!
//! The payload is serialized exactly once and signed; every attempt sends
//! those same bytes. Any non-2xx response or transport failure is retried
//! until the policy's attempt budget runs out.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use ferry_core::{crypto, Clock, ObjectEvent, RelayCredentials};
use tracing::{info, info_span, warn, Instrument};

use crate::{
    client::{WebhookClient, WebhookRequest},
    error::{DeliveryError, NotifyError},
    retry::RetryPolicy,
};

/// Summary of a delivered webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Status of the accepting response.
    pub status_code: u16,
    /// Time from first attempt to acceptance, sleeps included.
    pub elapsed: Duration,
}

/// Posts signed events to the receiver.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: WebhookClient,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl WebhookDispatcher {
    /// Creates a dispatcher.
    pub fn new(client: WebhookClient, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { client, policy, clock }
    }

    /// Retry policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delivers `event` to `credentials.webhook_url`.
    ///
    /// # Errors
    ///
    /// `NotifyError::Payload` if the event cannot be serialized or signed,
    /// `NotifyError::RetriesExhausted` once every attempt has failed.
    pub async fn dispatch(
        &self,
        event: &ObjectEvent,
        credentials: &RelayCredentials,
    ) -> Result<DispatchReport, NotifyError> {
        self.dispatch_with(event, credentials, &mut |_| {}).await
    }

    /// Like [`dispatch`](Self::dispatch), calling `on_attempt` before each
    /// attempt with its 1-based number.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub async fn dispatch_with(
        &self,
        event: &ObjectEvent,
        credentials: &RelayCredentials,
        on_attempt: &mut (dyn FnMut(u32) + Send),
    ) -> Result<DispatchReport, NotifyError> {
        let body = Bytes::from(
            event.to_wire_bytes().map_err(|e| NotifyError::payload(e.to_string()))?,
        );
        let signature = crypto::sign_hex(&body, &credentials.signing_key)
            .map_err(|e| NotifyError::payload(e.to_string()))?;

        let span = info_span!(
            "webhook_dispatch",
            event_id = %event.event_id,
            key = %event.key,
            max_attempts = self.policy.max_attempts,
        );

        async move {
            let started = self.clock.now();
            let max_attempts = self.policy.max_attempts.max(1);
            let mut last_error = DeliveryError::network("no attempt made");

            for attempt in 1..=max_attempts {
                if let Some(delay) = self.policy.delay_before(attempt) {
                    info!(attempt, delay_ms = delay.as_millis(), "backing off before retry");
                    self.clock.sleep(delay).await;
                }

                on_attempt(attempt);
                let request = WebhookRequest {
                    url: credentials.webhook_url.clone(),
                    body: body.clone(),
                    api_key: credentials.api_key.clone(),
                    signature: signature.clone(),
                    timestamp: self.clock.now_utc(),
                    event_id: event.event_id.clone(),
                    attempt,
                };

                match self.client.send(&request).await {
                    Ok(response) => {
                        let elapsed = self.clock.now().duration_since(started);
                        info!(
                            attempt,
                            status = response.status_code,
                            elapsed_ms = elapsed.as_millis(),
                            "webhook accepted"
                        );
                        return Ok(DispatchReport {
                            attempts: attempt,
                            status_code: response.status_code,
                            elapsed,
                        });
                    },
                    Err(error) => {
                        warn!(attempt, error = %error, "webhook attempt failed");
                        last_error = error;
                    },
                }
            }

            Err(NotifyError::RetriesExhausted { attempts: max_attempts, last_error })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ferry_core::{CapabilityUrl, ObjectCreated, TestClock};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn event() -> ObjectEvent {
        let now = Utc::now();
        ObjectEvent::new(
            ObjectCreated {
                event_id: "e1".to_string(),
                created_at: now,
                bucket: "b".to_string(),
                key: "uploads/report.csv".to_string(),
                size: 1024,
                etag: "etag".to_string(),
            },
            CapabilityUrl { url: "https://b.s3/uploads/report.csv".to_string(), expires_at: now },
        )
    }

    fn dispatcher(clock: &TestClock) -> WebhookDispatcher {
        WebhookDispatcher::new(
            WebhookClient::with_defaults().unwrap(),
            RetryPolicy::default(),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn signature_covers_the_sent_bytes() {
        let server = MockServer::start().await;
        let event = event();
        let body = event.to_wire_bytes().unwrap();
        let signature = crypto::sign_hex(&body, "K").unwrap();

        Mock::given(matchers::method("POST"))
            .and(matchers::header("X-Signature", signature.as_str()))
            .and(matchers::body_bytes(body))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let clock = TestClock::new();
        let credentials = RelayCredentials::new(server.uri(), "api", "K");
        let report = dispatcher(&clock).dispatch(&event, &credentials).await.unwrap();

        assert_eq!(report.attempts, 1);
        assert!(clock.recorded_sleeps().is_empty());
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_attempts_with_exponential_gaps() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let clock = TestClock::new();
        let credentials = RelayCredentials::new(server.uri(), "api", "K");
        let mut seen = Vec::new();
        let error = dispatcher(&clock)
            .dispatch_with(&event(), &credentials, &mut |n| seen.push(n))
            .await
            .unwrap_err();

        match error {
            NotifyError::RetriesExhausted { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error.status_code(), Some(503));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(
            clock.recorded_sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)]
        );
    }

    #[tokio::test]
    async fn recovers_when_receiver_comes_back() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let clock = TestClock::new();
        let credentials = RelayCredentials::new(server.uri(), "api", "K");
        let report = dispatcher(&clock).dispatch(&event(), &credentials).await.unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.status_code, 200);
        assert_eq!(report.elapsed, Duration::from_secs(6));
    }

    #[tokio::test]
    async fn client_errors_are_retried_too() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let clock = TestClock::new();
        let dispatcher = WebhookDispatcher::new(
            WebhookClient::with_defaults().unwrap(),
            RetryPolicy { max_attempts: 2, ..Default::default() },
            Arc::new(clock.clone()),
        );
        let credentials = RelayCredentials::new(server.uri(), "api", "K");

        let error = dispatcher.dispatch(&event(), &credentials).await.unwrap_err();
        assert!(matches!(error, NotifyError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn empty_signing_key_fails_before_sending() {
        let server = MockServer::start().await;
        Mock::given(matchers::any()).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let clock = TestClock::new();
        let credentials = RelayCredentials::new(server.uri(), "api", "");
        let error = dispatcher(&clock).dispatch(&event(), &credentials).await.unwrap_err();

        assert!(matches!(error, NotifyError::Payload { .. }));
    }
}
