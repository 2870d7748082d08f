//! ferry receiver.
//!
//! Serves `POST /webhook/{relay_name}`: authenticates each signed event,
//! downloads the object through its capability URL, and writes it to the
//! SFTP destination before answering.

use std::sync::Arc;

use anyhow::{Context, Result};
use ferry_api::ReceiverConfig;
use ferry_core::RealClock;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ReceiverConfig::load().context("refusing to start without a valid configuration")?;
    init_tracing(&config.rust_log);

    info!("Starting ferry receiver");
    info!(config = ?config, "Configuration loaded");

    let state = config.build_state(Arc::new(RealClock::new()))?;
    let addr = config.server_addr()?;

    info!(
        %addr,
        relay = %config.relay_name,
        sftp = %format!("{}@{}:{}", config.sftp_user, config.sftp_host, config.sftp_port),
        base_dir = %config.sftp_base_dir,
        "ferry is ready to receive webhooks"
    );

    ferry_api::start_server(state, config.server_settings(), addr).await.context("server failed")?;

    info!("ferry shutdown complete");
    Ok(())
}

/// Initializes tracing; `RUST_LOG` wins over the configured filter.
fn init_tracing(configured: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info,ferry=debug,tower_http=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
