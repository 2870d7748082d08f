//! Receiver test environment.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use ferry_api::{
    create_router, AppState, ServerSettings, TransferOrchestrator, WebhookAuthenticator,
};
use ferry_core::{Clock, RelayCredentials, TestClock};
use serde_json::Value;
use tower::ServiceExt;

use crate::{
    fetcher::RecordingFetcher,
    fixtures::{EventBuilder, SignedWebhook},
    uploader::MemoryUploaderFactory,
};

/// API key shared by `TestEnv` and `EventBuilder` defaults.
pub const API_KEY: &str = "test-api-key";
/// Signing key shared by `TestEnv` and `EventBuilder` defaults.
pub const SIGNING_KEY: &str = "K";
/// Relay name the test router accepts.
pub const RELAY_NAME: &str = "s3";
/// Remote base directory.
pub const BASE_DIR: &str = "/upload";

/// Status and parsed JSON body of a routed request.
#[derive(Debug, Clone)]
pub struct TestResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// `X-Request-Id` echoed by the server.
    pub request_id: Option<String>,
    /// Body as JSON, `Value::Null` when empty or not JSON.
    pub body: Value,
}

/// Real router and orchestrator over in-memory collaborators.
pub struct TestEnv {
    /// Deterministic clock shared with the pipeline.
    pub clock: TestClock,
    /// Object source.
    pub fetcher: RecordingFetcher,
    /// Destination.
    pub uploaders: MemoryUploaderFactory,
    orchestrator: Arc<TransferOrchestrator>,
    router: Router,
}

impl TestEnv {
    /// Environment with a five minute replay window.
    pub fn new() -> Self {
        Self::with_replay_window(Some(Duration::from_secs(300)))
    }

    /// Environment with a custom replay window.
    pub fn with_replay_window(window: Option<Duration>) -> Self {
        Self::build(window, None)
    }

    /// Environment whose transfers must finish within `timeout`.
    pub fn with_transfer_timeout(timeout: Duration) -> Self {
        Self::build(Some(Duration::from_secs(300)), Some(timeout))
    }

    fn build(window: Option<Duration>, transfer_timeout: Option<Duration>) -> Self {
        let clock = TestClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let fetcher = RecordingFetcher::new();
        let uploaders = MemoryUploaderFactory::new();

        let authenticator = WebhookAuthenticator::new(
            Arc::new(RelayCredentials::new("", API_KEY, SIGNING_KEY)),
            Arc::clone(&shared_clock),
        )
        .with_replay_window(window);

        let orchestrator = TransferOrchestrator::new(
            authenticator,
            Arc::new(fetcher.clone()),
            Arc::new(uploaders.clone()),
            BASE_DIR,
            Arc::clone(&shared_clock),
        )
        .with_transfer_timeout(transfer_timeout);
        let state = AppState::new(orchestrator, RELAY_NAME, shared_clock)
            .with_health_timeout(Duration::from_secs(1));
        let orchestrator = Arc::clone(&state.orchestrator);
        let router = create_router(state, ServerSettings::default());

        Self { clock, fetcher, uploaders, orchestrator, router }
    }

    /// Event builder stamped with the current test time.
    pub fn event(&self) -> EventBuilder {
        EventBuilder::new(self.clock.now_utc())
    }

    /// Registers an object body under the builder's capability URL.
    pub fn serve_object(&self, builder: &EventBuilder, body: impl Into<bytes::Bytes>) {
        self.fetcher.serve(builder.event().presigned_url.clone(), body);
    }

    /// Orchestrator behind the router, for direct calls.
    pub fn orchestrator(&self) -> &TransferOrchestrator {
        &self.orchestrator
    }

    /// Copy of the router for `oneshot` calls.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Posts a signed webhook to the default relay.
    pub async fn post(&self, webhook: &SignedWebhook) -> TestResponse {
        self.send(webhook.request(RELAY_NAME)).await
    }

    /// Routes any request.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse { status, request_id, body }
    }

    /// Issues `GET path`.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Request::builder().uri(path).body(Body::empty()).unwrap()).await
    }

    /// Remote path an object created now would land at.
    pub fn expected_path(&self, key: &str) -> String {
        ferry_api::remote_path(BASE_DIR, key, self.clock.now_utc())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
