//! Receiver-side composition root.
//!
//! One call to [`TransferOrchestrator::process`] takes a raw webhook from
//! authentication to an acknowledgment. Stages run strictly in order and
//! the first failure ends the run:
//!
//! 1. authenticate the raw bytes and headers
//! 2. parse and validate the payload, then reject an expired capability
//! 3. open the object stream through the capability URL
//! 4. connect a fresh uploader
//! 5. upload to the date-partitioned remote path
//! 6. close the uploader, on every path once connected
//!
//! Nothing is retried here. A transfer failure becomes a 5xx and the
//! notifier redelivers the whole event with a fresh capability URL.
//!
//! Steps 3 to 6 share one deadline. Running past it is a transfer failure
//! of whichever stage was in flight, never a client error.

use std::{sync::Arc, time::Duration};

use axum::http::HeaderMap;
use ferry_core::{
    Clock, IncomingPayload, ObjectEvent, RelayError, RelayResponse, TransferResult, TransferStage,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    auth::WebhookAuthenticator,
    fetcher::Fetcher,
    uploader::{remote_path, UploadError, UploadStats, UploaderFactory},
};

/// Runs the authenticate, fetch, upload pipeline for one webhook.
#[derive(Debug, Clone)]
pub struct TransferOrchestrator {
    authenticator: WebhookAuthenticator,
    fetcher: Arc<dyn Fetcher>,
    uploaders: Arc<dyn UploaderFactory>,
    base_dir: String,
    clock: Arc<dyn Clock>,
    transfer_timeout: Option<Duration>,
}

impl TransferOrchestrator {
    /// Creates an orchestrator writing under `base_dir`.
    pub fn new(
        authenticator: WebhookAuthenticator,
        fetcher: Arc<dyn Fetcher>,
        uploaders: Arc<dyn UploaderFactory>,
        base_dir: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            authenticator,
            fetcher,
            uploaders,
            base_dir: base_dir.into(),
            clock,
            transfer_timeout: None,
        }
    }

    /// Bounds fetch, upload, and close together. `None` leaves them
    /// unbounded.
    #[must_use]
    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Uploader factory, shared with the health check.
    pub fn uploaders(&self) -> &Arc<dyn UploaderFactory> {
        &self.uploaders
    }

    /// Processes one webhook request.
    ///
    /// # Errors
    ///
    /// - `RelayError::Authentication` before any side effect
    /// - `RelayError::Validation` for malformed or incomplete payloads,
    ///   also before any side effect
    /// - `RelayError::Transfer` naming the stage that failed
    pub async fn process(
        &self,
        request_id: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<RelayResponse, RelayError> {
        let span = info_span!(
            "process_transfer",
            request_id = %request_id,
            object_key = tracing::field::Empty,
        );

        async move {
            self.authenticator.authenticate(headers, body)?;

            let payload = IncomingPayload::parse(body)?;
            let announces_expiry = payload.expires_at.is_some();
            let event = payload.into_event(self.clock.now_utc())?;
            if announces_expiry {
                self.authenticator.check_capability_expiry(event.expires_at)?;
            }
            tracing::Span::current().record("object_key", event.key.as_str());
            debug!(event_id = %event.event_id, bucket = %event.bucket, size = event.size, "payload accepted");

            let result = self.transfer_within_deadline(&event).await?;
            RelayResponse::from_result(&event.key, &result, self.clock.now_utc())
        }
        .instrument(span)
        .await
    }

    async fn transfer_within_deadline(&self, event: &ObjectEvent) -> Result<TransferResult, RelayError> {
        let mut stage = TransferStage::Fetch;
        let Some(limit) = self.transfer_timeout else {
            return self.transfer(event, &mut stage).await;
        };

        let outcome = tokio::time::timeout(limit, self.transfer(event, &mut stage)).await;
        outcome.unwrap_or_else(|_| {
            error!(%stage, timeout_ms = limit.as_millis(), "transfer deadline exceeded");
            Err(RelayError::transfer(
                stage,
                format!("timed out after {}ms", limit.as_millis()),
            ))
        })
    }

    async fn transfer(
        &self,
        event: &ObjectEvent,
        stage: &mut TransferStage,
    ) -> Result<TransferResult, RelayError> {
        let started = self.clock.now();
        let elapsed = || self.clock.now().duration_since(started);
        let path = remote_path(&self.base_dir, &event.key, event.created_at);

        let object = self.fetcher.fetch(&event.presigned_url).await.map_err(|e| {
            error!(error = %e, "object fetch failed");
            RelayError::transfer(TransferStage::Fetch, e.to_string())
        })?;
        let mut reader = object.reader;

        *stage = TransferStage::Connect;
        let mut uploader = self.uploaders.create();
        uploader.connect().await.map_err(|e| {
            error!(error = %e, "uploader connect failed");
            stage_error(&e)
        })?;

        *stage = TransferStage::Upload;
        let uploaded = uploader.upload(&mut reader, &path).await;
        *stage = TransferStage::Close;
        let closed = uploader.close().await;

        let outcome = match (uploaded, closed) {
            (Ok(stats), Ok(())) => Ok(stats),
            (Err(e), closed) => {
                if let Err(close_error) = closed {
                    warn!(error = %close_error, "uploader close failed after upload error");
                }
                Err(e)
            },
            (Ok(_), Err(e)) => Err(e),
        };

        match outcome {
            Ok(UploadStats { bytes_written, .. }) => {
                if bytes_written != event.size {
                    warn!(expected = event.size, bytes_written, "transferred size differs from announced size");
                }
                let result = TransferResult::succeeded(&path, bytes_written, elapsed());
                info!(
                    remote_path = %result.remote_path,
                    bytes_transferred = result.bytes_transferred,
                    elapsed_ms = result.elapsed.as_millis(),
                    "transfer complete"
                );
                Ok(result)
            },
            Err(e) => {
                let result = TransferResult::failed(&path, 0, elapsed(), e.to_string());
                error!(
                    remote_path = %result.remote_path,
                    error = result.error.as_deref().unwrap_or_default(),
                    "transfer failed"
                );
                Err(stage_error(&e))
            },
        }
    }
}

/// Maps an uploader failure onto the pipeline stage it belongs to.
fn stage_error(error: &UploadError) -> RelayError {
    let stage = match error {
        UploadError::Connect { .. } | UploadError::Authentication { .. } => TransferStage::Connect,
        UploadError::Close { .. } => TransferStage::Close,
        UploadError::CreateDirectory { .. }
        | UploadError::CreateFile { .. }
        | UploadError::Copy { .. }
        | UploadError::NotConnected => TransferStage::Upload,
    };
    RelayError::transfer(stage, error.to_string())
}
