//! Receiver side of the ferry relay.
//!
//! Accepts signed webhooks, fetches the announced object through its
//! capability URL, and streams it to an SFTP destination. Every request
//! gets its own uploader instance from an [`UploaderFactory`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod fetcher;
pub mod handlers;
pub mod orchestrator;
pub mod server;
pub mod uploader;

use std::{sync::Arc, time::Duration};

use ferry_core::Clock;

pub use auth::WebhookAuthenticator;
pub use config::ReceiverConfig;
pub use fetcher::{FetchError, FetchedObject, Fetcher, HttpFetcher, ObjectStream};
pub use orchestrator::TransferOrchestrator;
pub use server::{create_router, start_server, ServerSettings};
pub use uploader::{
    remote_path, RemoteUploader, SftpSettings, SftpUploader, SftpUploaderFactory, UploadError,
    UploadStats, UploaderFactory,
};

/// Default bound on the health check's SFTP connect.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Pipeline for webhook requests.
    pub orchestrator: Arc<TransferOrchestrator>,
    /// Accepted value of the `{relay_name}` path segment.
    pub relay_name: Arc<str>,
    /// Clock for response timestamps.
    pub clock: Arc<dyn Clock>,
    /// Bound on the health check.
    pub health_timeout: Duration,
}

impl AppState {
    /// Creates application state.
    pub fn new(orchestrator: TransferOrchestrator, relay_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            relay_name: Arc::from(relay_name.into()),
            clock,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Overrides the health check bound.
    #[must_use]
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }
}
