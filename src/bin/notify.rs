//! ferry notifier.
//!
//! Reads one object-created bus envelope from stdin, mints a capability
//! URL for the object, and delivers the signed webhook. Exits non-zero
//! when the event cannot be delivered so the invoking infrastructure
//! redelivers it.

use std::{io::Read, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use ferry_core::RealClock;
use ferry_notifier::{BusEnvelope, Notifier, NotifierConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{e:#}"), "notification failed");
            eprintln!("ferry-notify: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run() -> Result<()> {
    let config = NotifierConfig::load()?;
    init_tracing(&config.rust_log);

    let mut raw = Vec::new();
    std::io::stdin().read_to_end(&mut raw).context("failed to read event from stdin")?;

    let object = BusEnvelope::parse(&raw)?.into_object()?;
    info!(event_id = %object.event_id, bucket = %object.bucket, key = %object.key, "event received");

    let notifier = Notifier::from_config(&config, Arc::new(RealClock::new()))
        .context("failed to build notifier")?;
    let outcome = notifier.handle(object).await?;

    info!(
        event_id = %outcome.event_id,
        state = %outcome.state,
        attempts = outcome.attempts,
        "event delivered"
    );
    Ok(())
}

/// Initializes tracing; `RUST_LOG` wins over the configured filter.
fn init_tracing(configured: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
