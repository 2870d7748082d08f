//! Webhook endpoint.
//!
//! Processing is synchronous: the response is sent once the object is on
//! the destination or the pipeline has definitively failed. The
//! orchestrator's transfer deadline bounds the whole transfer and answers
//! `500` when it expires; dropping the request future aborts an in-flight
//! fetch or upload.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use ferry_core::RelayError;
use tracing::{error, info, instrument, warn};

use super::{error_response, ErrorResponse};
use crate::{server::RequestId, AppState};

/// Authenticates, fetches, and uploads the object a webhook announces.
///
/// Answers `200` with the relay acknowledgment, `401` for failed
/// authentication, `400` for an invalid payload, `404` for an unknown
/// relay name, and `500` for transfer failures.
#[instrument(
    name = "receive_webhook",
    skip(state, request_id, headers, body),
    fields(relay_name = %relay_name, body_bytes = body.len())
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(relay_name): Path<String>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if relay_name != *state.relay_name {
        warn!("webhook for unknown relay");
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", format!("unknown relay: {relay_name}"))),
        )
            .into_response();
    }

    let request_id = request_id.map(|Extension(id)| id.0).unwrap_or_default();

    match state.orchestrator.process(&request_id, &headers, &body).await {
        Ok(response) => {
            info!(file = %response.file, "webhook processed");
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => {
            match &e {
                RelayError::Authentication { .. } => {},
                RelayError::Validation { .. } => warn!(error = %e, "webhook rejected"),
                RelayError::Transfer { .. } | RelayError::Internal { .. } => {
                    error!(code = e.code(), error = %e, "webhook processing failed");
                },
            }
            error_response(&e)
        },
    }
}
