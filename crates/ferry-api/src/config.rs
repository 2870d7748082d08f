//! Receiver configuration.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ferry_core::{Clock, RelayCredentials};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::WebhookAuthenticator,
    fetcher::HttpFetcher,
    orchestrator::TransferOrchestrator,
    server::ServerSettings,
    uploader::{SftpSettings, SftpUploaderFactory},
    AppState,
};

const CONFIG_FILE: &str = "ferry.toml";

/// Receiver settings from defaults, `ferry.toml`, and the environment.
///
/// Environment variables win over the file, which wins over defaults.
/// SFTP destination and webhook secrets have no usable defaults and must
/// be provided; `load` refuses to return a config without them.
#[derive(Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    // Server
    /// Bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// Whole-request timeout in seconds, covering the synchronous transfer.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_SECONDS`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT_SECONDS")]
    pub request_timeout_seconds: u64,
    /// Largest accepted webhook body.
    ///
    /// Environment variable: `MAX_BODY_BYTES`
    #[serde(default = "default_max_body_bytes", alias = "MAX_BODY_BYTES")]
    pub max_body_bytes: usize,
    /// Path segment of `POST /webhook/{relay_name}`.
    ///
    /// Environment variable: `RELAY_NAME`
    #[serde(default = "default_relay_name", alias = "RELAY_NAME")]
    pub relay_name: String,

    // SFTP destination
    /// Environment variable: `SFTP_HOST`
    #[serde(default, alias = "SFTP_HOST")]
    pub sftp_host: String,
    /// Environment variable: `SFTP_PORT`
    #[serde(default = "default_sftp_port", alias = "SFTP_PORT")]
    pub sftp_port: u16,
    /// Environment variable: `SFTP_USER`
    #[serde(default, alias = "SFTP_USER")]
    pub sftp_user: String,
    /// Environment variable: `SFTP_PASSWORD`
    #[serde(default, alias = "SFTP_PASSWORD", skip_serializing)]
    pub sftp_password: String,
    /// Root of the date-partitioned layout.
    ///
    /// Environment variable: `SFTP_BASE_DIR`
    #[serde(default = "default_base_dir", alias = "SFTP_BASE_DIR")]
    pub sftp_base_dir: String,
    /// Bound on connect, handshake and login, in seconds.
    ///
    /// Environment variable: `SFTP_CONNECT_TIMEOUT_SECONDS`
    #[serde(default = "default_connect_timeout", alias = "SFTP_CONNECT_TIMEOUT_SECONDS")]
    pub sftp_connect_timeout_seconds: u64,
    /// Pinned `SHA256:` host key fingerprint.
    ///
    /// Environment variable: `SFTP_HOST_KEY_FINGERPRINT`
    #[serde(default, alias = "SFTP_HOST_KEY_FINGERPRINT")]
    pub sftp_host_key_fingerprint: Option<String>,

    // Object fetch
    /// Environment variable: `FETCH_TIMEOUT_SECONDS`
    #[serde(default = "default_fetch_timeout", alias = "FETCH_TIMEOUT_SECONDS")]
    pub fetch_timeout_seconds: u64,
    /// Environment variable: `FETCH_CONNECT_TIMEOUT_SECONDS`
    #[serde(default = "default_connect_timeout", alias = "FETCH_CONNECT_TIMEOUT_SECONDS")]
    pub fetch_connect_timeout_seconds: u64,

    // Webhook authentication
    /// Environment variable: `WEBHOOK_API_KEY`
    #[serde(default, alias = "WEBHOOK_API_KEY", skip_serializing)]
    pub webhook_api_key: String,
    /// Environment variable: `WEBHOOK_SIGNING_KEY`
    #[serde(default, alias = "WEBHOOK_SIGNING_KEY", skip_serializing)]
    pub webhook_signing_key: String,
    /// Maximum timestamp age in seconds; 0 disables the check.
    ///
    /// Environment variable: `REPLAY_WINDOW_SECONDS`
    #[serde(default = "default_replay_window", alias = "REPLAY_WINDOW_SECONDS")]
    pub replay_window_seconds: u64,

    // Logging
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl ReceiverConfig {
    /// Loads and validates configuration.
    ///
    /// # Errors
    ///
    /// Fails when a value does not parse or a required setting is missing.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("failed to load receiver configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address to bind.
    ///
    /// # Errors
    ///
    /// Fails when `host` is not an IP address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// Whole-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Router-level limits.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings { request_timeout: self.request_timeout(), max_body_bytes: self.max_body_bytes }
    }

    /// SFTP destination settings.
    pub fn sftp_settings(&self) -> SftpSettings {
        SftpSettings {
            host: self.sftp_host.clone(),
            port: self.sftp_port,
            user: self.sftp_user.clone(),
            password: self.sftp_password.clone(),
            connect_timeout: Duration::from_secs(self.sftp_connect_timeout_seconds),
            host_key_fingerprint: self.sftp_host_key_fingerprint.clone().filter(|f| !f.is_empty()),
        }
    }

    /// Shared secrets for inbound authentication.
    pub fn credentials(&self) -> RelayCredentials {
        RelayCredentials::new("", self.webhook_api_key.clone(), self.webhook_signing_key.clone())
    }

    /// Replay window, or `None` when disabled.
    pub fn replay_window(&self) -> Option<Duration> {
        (self.replay_window_seconds > 0).then(|| Duration::from_secs(self.replay_window_seconds))
    }

    /// Wires the production pipeline: real fetcher, SFTP uploaders, and
    /// the given clock.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn build_state(&self, clock: Arc<dyn Clock>) -> Result<AppState> {
        let authenticator = WebhookAuthenticator::new(Arc::new(self.credentials()), Arc::clone(&clock))
            .with_replay_window(self.replay_window());
        let fetcher = HttpFetcher::new(
            Duration::from_secs(self.fetch_timeout_seconds),
            Duration::from_secs(self.fetch_connect_timeout_seconds),
        )
        .context("failed to build object fetcher")?;
        let uploaders = SftpUploaderFactory::new(self.sftp_settings());

        let orchestrator = TransferOrchestrator::new(
            authenticator,
            Arc::new(fetcher),
            Arc::new(uploaders),
            self.sftp_base_dir.clone(),
            Arc::clone(&clock),
        )
        .with_transfer_timeout(Some(self.request_timeout()));

        Ok(AppState::new(orchestrator, self.relay_name.clone(), clock)
            .with_health_timeout(Duration::from_secs(self.sftp_connect_timeout_seconds)))
    }

    /// Validates configuration values.
    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.sftp_host.trim().is_empty() {
            missing.push("SFTP_HOST");
        }
        if self.sftp_user.trim().is_empty() {
            missing.push("SFTP_USER");
        }
        if self.sftp_password.is_empty() {
            missing.push("SFTP_PASSWORD");
        }
        if self.webhook_api_key.is_empty() {
            missing.push("WEBHOOK_API_KEY");
        }
        if self.webhook_signing_key.is_empty() {
            missing.push("WEBHOOK_SIGNING_KEY");
        }
        if !missing.is_empty() {
            anyhow::bail!("missing required settings: {}", missing.join(", "));
        }

        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be greater than 0");
        }

        if self.relay_name.is_empty() || self.relay_name.contains('/') {
            anyhow::bail!("relay_name must be a single non-empty path segment");
        }

        if !self.sftp_base_dir.starts_with('/') {
            anyhow::bail!("sftp_base_dir must be an absolute path");
        }

        if self.sftp_connect_timeout_seconds == 0 || self.fetch_timeout_seconds == 0 {
            anyhow::bail!("SFTP and fetch timeouts must be greater than 0");
        }

        self.server_addr()?;
        Ok(())
    }
}

impl std::fmt::Debug for ReceiverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("relay_name", &self.relay_name)
            .field("sftp_host", &self.sftp_host)
            .field("sftp_port", &self.sftp_port)
            .field("sftp_user", &self.sftp_user)
            .field("sftp_password", &"***")
            .field("sftp_base_dir", &self.sftp_base_dir)
            .field("sftp_connect_timeout_seconds", &self.sftp_connect_timeout_seconds)
            .field("sftp_host_key_fingerprint", &self.sftp_host_key_fingerprint)
            .field("fetch_timeout_seconds", &self.fetch_timeout_seconds)
            .field("fetch_connect_timeout_seconds", &self.fetch_connect_timeout_seconds)
            .field("webhook_api_key", &"***")
            .field("webhook_signing_key", &"***")
            .field("replay_window_seconds", &self.replay_window_seconds)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            relay_name: default_relay_name(),
            sftp_host: String::new(),
            sftp_port: default_sftp_port(),
            sftp_user: String::new(),
            sftp_password: String::new(),
            sftp_base_dir: default_base_dir(),
            sftp_connect_timeout_seconds: default_connect_timeout(),
            sftp_host_key_fingerprint: None,
            fetch_timeout_seconds: default_fetch_timeout(),
            fetch_connect_timeout_seconds: default_connect_timeout(),
            webhook_api_key: String::new(),
            webhook_signing_key: String::new(),
            replay_window_seconds: default_replay_window(),
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_relay_name() -> String {
    "s3".to_string()
}

fn default_sftp_port() -> u16 {
    22
}

fn default_base_dir() -> String {
    "/upload".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_replay_window() -> u64 {
    300
}

fn default_log_level() -> String {
    "info,ferry=debug,tower_http=debug".to_string()
}
