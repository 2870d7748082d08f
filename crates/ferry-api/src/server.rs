//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID propagation
//! 2. Request/response tracing
//! 3. Timeout enforcement for slow request bodies; the transfer itself is
//!    bounded by the orchestrator so it fails as a `500`
//! 4. Panic recovery into a JSON `500`
//! 5. Body size limit
//! 6. Handler execution
//!
//! # Graceful Shutdown
//!
//! On SIGINT or SIGTERM the server stops accepting connections and waits
//! for in-flight requests to finish.

use std::{any::Any, net::SocketAddr, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{handlers, handlers::ErrorResponse, AppState};

/// Extra time the router-level timeout allows beyond the transfer deadline.
pub const REQUEST_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Header carrying the request id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Router-level limits.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Transfer deadline. The router-level timeout adds
    /// [`REQUEST_TIMEOUT_GRACE`] on top.
    pub request_timeout: Duration,
    /// Largest accepted body.
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(300), max_body_bytes: 64 * 1024 }
    }
}

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState, settings: ServerSettings) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check));

    let webhook_routes = Router::new()
        .route("/webhook/{relay_name}", post(handlers::receive_webhook))
        .layer(DefaultBodyLimit::max(settings.max_body_bytes));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(settings.request_timeout + REQUEST_TIMEOUT_GRACE))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Reuses the caller's `X-Request-Id` or mints one, and echoes it on the
/// response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Converts a handler panic into a generic `500` so one request cannot
/// take the serving loop down.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(code = "E3001", panic = detail, "request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal_error", "internal server error")),
    )
        .into_response()
}

/// Starts the HTTP server with graceful shutdown support.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    state: AppState,
    settings: ServerSettings,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state, settings);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight transfers to complete");
}
