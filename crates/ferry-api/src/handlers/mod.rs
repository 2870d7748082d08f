//! HTTP request handlers.
//!
//! - `webhook` runs the transfer pipeline for `POST /webhook/{relay_name}`
//! - `health` answers the dependency check and the liveness check
//!
//! Error bodies share one shape, `{"error": <label>, "message": <detail>}`,
//! with the status taken from the error taxonomy.

pub mod health;
pub mod webhook;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ferry_core::RelayError;
use serde::{Deserialize, Serialize};

pub use health::{health_check, liveness_check};
pub use webhook::receive_webhook;

/// Error body returned for every non-2xx answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable label such as `unauthorized`.
    pub error: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorResponse {
    /// Creates an error body.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error: error.into(), message: message.into() }
    }
}

/// Renders a pipeline error with its mapped status.
pub fn error_response(error: &RelayError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::new(error.label(), error.to_string()))).into_response()
}

#[cfg(test)]
mod tests {
    use ferry_core::TransferStage;

    use super::*;

    #[test]
    fn error_status_follows_taxonomy() {
        let cases = [
            (RelayError::authentication("invalid signature"), StatusCode::UNAUTHORIZED),
            (RelayError::validation("missing required field: key"), StatusCode::BAD_REQUEST),
            (RelayError::transfer(TransferStage::Fetch, "403"), StatusCode::INTERNAL_SERVER_ERROR),
            (RelayError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error_response(&error).status(), expected, "{error}");
        }
    }
}
