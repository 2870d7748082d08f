//! Health and liveness checks.
//!
//! `/health` opens and closes a real session against the SFTP destination
//! with a fresh uploader, so it reflects whether a transfer could succeed
//! right now. `/live` touches nothing and only proves the process answers.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use ferry_core::Clock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{uploader::UploaderFactory, AppState};

/// Health check response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Per-dependency status
    pub services: Services,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All dependencies reachable
    Healthy,
    /// SFTP destination unreachable
    Degraded,
}

/// Status of each dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Services {
    /// SFTP destination
    pub sftp: ServiceStatus,
    /// Webhook endpoint
    pub webhook: ServiceStatus,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Session could be opened
    Connected,
    /// Session could not be opened in time
    Disconnected,
    /// Served by this process
    Running,
}

/// Health service that encapsulates the clock and check dependencies.
pub struct HealthService {
    clock: Arc<dyn Clock>,
    uploaders: Arc<dyn UploaderFactory>,
    timeout: Duration,
}

impl HealthService {
    /// Creates a health service probing through `uploaders`.
    pub fn new(clock: Arc<dyn Clock>, uploaders: Arc<dyn UploaderFactory>, timeout: Duration) -> Self {
        Self { clock, uploaders, timeout }
    }

    /// Runs the SFTP check and assembles the report.
    pub async fn health_check(&self) -> HealthResponse {
        let sftp = self.check_sftp().await;
        let status = match sftp {
            ServiceStatus::Disconnected => HealthStatus::Degraded,
            ServiceStatus::Connected | ServiceStatus::Running => HealthStatus::Healthy,
        };

        HealthResponse {
            status,
            timestamp: self.clock.now_utc(),
            services: Services { sftp, webhook: ServiceStatus::Running },
        }
    }

    async fn check_sftp(&self) -> ServiceStatus {
        let mut uploader = self.uploaders.create();
        let check = async {
            let connected = uploader.connect().await;
            let closed = uploader.close().await;
            connected.and(closed)
        };

        match tokio::time::timeout(self.timeout, check).await {
            Ok(Ok(())) => {
                debug!("SFTP health check passed");
                ServiceStatus::Connected
            },
            Ok(Err(e)) => {
                warn!(error = %e, "SFTP health check failed");
                ServiceStatus::Disconnected
            },
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "SFTP health check timed out");
                ServiceStatus::Disconnected
            },
        }
    }
}

/// Dependency health endpoint: `200` when healthy, `503` when degraded.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let service = HealthService::new(
        Arc::clone(&state.clock),
        Arc::clone(state.orchestrator.uploaders()),
        state.health_timeout,
    );
    let response = service.health_check().await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, sftp = ?response.services.sftp, "health check completed");
    (status_code, Json(response)).into_response()
}

/// Liveness endpoint with no dependency checks.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "ferry",
    });

    (StatusCode::OK, Json(response)).into_response()
}
