//! HTTP client for posting signed events to the receiver.
//!
//! One `send` is one attempt. The client classifies the outcome into a
//! `DeliveryError` and leaves retrying to the dispatcher.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, NotifyError};

/// Largest response body kept for error reporting.
const MAX_ERROR_BODY_BYTES: usize = 1024;

/// Configuration for the webhook client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("ferry-notifier/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 3,
        }
    }
}

/// One signed webhook attempt.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Receiver endpoint.
    pub url: String,
    /// Exact bytes that were signed.
    pub body: Bytes,
    /// Value for `X-API-Key`.
    pub api_key: String,
    /// Hex HMAC of `body`, sent in `X-Signature`.
    pub signature: String,
    /// Send time, sent in `X-Timestamp`.
    pub timestamp: DateTime<Utc>,
    /// Event identifier, sent in `X-Event-Id`.
    pub event_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Response to a successful attempt.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    /// HTTP status code (2xx).
    pub status_code: u16,
    /// Response body.
    pub body: String,
    /// Round-trip time.
    pub duration: Duration,
}

/// Thin wrapper over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl WebhookClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Configuration` if the TLS backend cannot be
    /// initialized.
    pub fn new(config: ClientConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| NotifyError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// See [`WebhookClient::new`].
    pub fn with_defaults() -> Result<Self, NotifyError> {
        Self::new(ClientConfig::default())
    }

    /// Posts one attempt.
    ///
    /// # Errors
    ///
    /// - `NetworkError` when the connection fails
    /// - `Timeout` when the client timeout elapses
    /// - `ClientError` / `ServerError` for any non-2xx status
    pub async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, DeliveryError> {
        let span = info_span!(
            "webhook_attempt",
            event_id = %request.event_id,
            attempt = request.attempt,
        );

        async move {
            let started = std::time::Instant::now();

            let result = self
                .client
                .post(&request.url)
                .header("Content-Type", "application/json")
                .header("X-API-Key", &request.api_key)
                .header("X-Signature", &request.signature)
                .header("X-Timestamp", request.timestamp.to_rfc3339())
                .header("X-Event-Id", &request.event_id)
                .body(request.body.clone())
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    warn!(duration_ms = started.elapsed().as_millis(), "request failed: {e}");
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = started.elapsed();
            let status_code = response.status().as_u16();
            debug!(status = status_code, duration_ms = duration.as_millis(), "received response");

            if response.status().is_success() {
                let body = read_body(response).await;
                return Ok(WebhookResponse { status_code, body, duration });
            }

            let body = read_body(response).await;
            warn!(status = status_code, "receiver rejected webhook");
            Err(DeliveryError::from_status(status_code, body))
        }
        .instrument(span)
        .await
    }
}

async fn read_body(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_ERROR_BODY_BYTES => {
            let truncated = String::from_utf8_lossy(&bytes[..MAX_ERROR_BODY_BYTES]);
            format!("{truncated}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("[failed to read response body: {e}]"),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(url: String) -> WebhookRequest {
        WebhookRequest {
            url,
            body: Bytes::from_static(br#"{"eventId":"e1"}"#),
            api_key: "api-key".to_string(),
            signature: "ab".repeat(32),
            timestamp: Utc::now(),
            event_id: "e1".to_string(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn sends_auth_headers_and_exact_body() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook/s3"))
            .and(matchers::header("X-API-Key", "api-key"))
            .and(matchers::header("X-Signature", "ab".repeat(32).as_str()))
            .and(matchers::header("Content-Type", "application/json"))
            .and(matchers::header("X-Event-Id", "e1"))
            .and(matchers::body_bytes(br#"{"eventId":"e1"}"#.to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = WebhookClient::with_defaults().unwrap();
        let response = client.send(&request(format!("{}/webhook/s3", server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "ok");
    }

    #[tokio::test]
    async fn non_success_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/unauthorized"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .mount(&server)
            .await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = WebhookClient::with_defaults().unwrap();

        let error = client.send(&request(format!("{}/unauthorized", server.uri()))).await.unwrap_err();
        assert_eq!(
            error,
            DeliveryError::ClientError { status_code: 401, body: "nope".to_string() }
        );

        let error = client.send(&request(format!("{}/down", server.uri()))).await.unwrap_err();
        assert_eq!(error.status_code(), Some(503));
    }

    #[tokio::test]
    async fn slow_receiver_times_out() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = WebhookClient::new(ClientConfig {
            timeout: Duration::from_millis(50),
            ..Default::default()
        })
        .unwrap();

        let error = client.send(&request(server.uri())).await.unwrap_err();
        assert!(matches!(error, DeliveryError::Timeout { .. }), "{error:?}");
    }

    #[tokio::test]
    async fn unreachable_receiver_is_network_error() {
        let client = WebhookClient::with_defaults().unwrap();
        let error = client.send(&request("http://127.0.0.1:1/webhook".to_string())).await.unwrap_err();
        assert!(matches!(error, DeliveryError::NetworkError { .. }), "{error:?}");
    }
}
