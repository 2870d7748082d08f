//! Notifier configuration.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ferry_core::Clock;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientConfig,
    credentials::{CredentialSource, EnvCredentialSource, FileCredentialSource},
    presign::{AwsIdentity, PresignError, SigV4Presigner, MAX_VALIDITY_SECONDS},
    retry::RetryPolicy,
};

const CONFIG_FILE: &str = "notifier.toml";

/// Notifier settings from defaults, `notifier.toml`, and the environment.
///
/// Environment variables win over the file, which wins over defaults.
/// Relay secrets are not part of this struct: they come from the document
/// at `WEBHOOK_SECRET_PATH` or, when unset, from `WEBHOOK_URL`,
/// `WEBHOOK_API_KEY` and `WEBHOOK_SIGNING_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    // Object store
    /// Region capability URLs are scoped to.
    ///
    /// Environment variable: `AWS_REGION`
    #[serde(default, alias = "AWS_REGION")]
    pub aws_region: String,
    /// Access key id used for signing.
    ///
    /// Environment variable: `AWS_ACCESS_KEY_ID`
    #[serde(default, alias = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: String,
    /// Secret key used for signing.
    ///
    /// Environment variable: `AWS_SECRET_ACCESS_KEY`
    #[serde(default, alias = "AWS_SECRET_ACCESS_KEY", skip_serializing)]
    pub aws_secret_access_key: String,
    /// Session token for temporary credentials.
    ///
    /// Environment variable: `AWS_SESSION_TOKEN`
    #[serde(default, alias = "AWS_SESSION_TOKEN", skip_serializing)]
    pub aws_session_token: Option<String>,
    /// Custom S3-compatible endpoint; switches to path-style URLs.
    ///
    /// Environment variable: `S3_ENDPOINT`
    #[serde(default, alias = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,
    /// Capability URL validity in seconds.
    ///
    /// Environment variable: `PRESIGN_EXPIRY_SECONDS`
    #[serde(default = "default_presign_expiry", alias = "PRESIGN_EXPIRY_SECONDS")]
    pub presign_expiry_seconds: u64,

    // Secrets
    /// JSON secret document with the webhook URL and keys.
    ///
    /// Environment variable: `WEBHOOK_SECRET_PATH`
    #[serde(default, alias = "WEBHOOK_SECRET_PATH")]
    pub webhook_secret_path: Option<PathBuf>,

    // Retry
    /// Total delivery attempts.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[serde(default = "default_max_retries", alias = "MAX_RETRIES")]
    pub max_retries: u32,
    /// Exponential backoff base in seconds.
    ///
    /// Environment variable: `BACKOFF_BASE`
    #[serde(default = "default_backoff_base", alias = "BACKOFF_BASE")]
    pub backoff_base: f64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `RETRY_JITTER_FACTOR`
    #[serde(default, alias = "RETRY_JITTER_FACTOR")]
    pub retry_jitter_factor: f64,
    /// Cap on any single backoff delay in seconds.
    ///
    /// Environment variable: `RETRY_MAX_DELAY_SECONDS`
    #[serde(default = "default_max_delay", alias = "RETRY_MAX_DELAY_SECONDS")]
    pub retry_max_delay_seconds: u64,

    // Client
    /// Per-attempt HTTP timeout in seconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout", alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: u64,
    /// TCP connect timeout in seconds.
    ///
    /// Environment variable: `DELIVERY_CONNECT_TIMEOUT_SECONDS`
    #[serde(default = "default_connect_timeout", alias = "DELIVERY_CONNECT_TIMEOUT_SECONDS")]
    pub delivery_connect_timeout_seconds: u64,

    // Logging
    /// Log filter.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl NotifierConfig {
    /// Loads and validates configuration.
    ///
    /// # Errors
    ///
    /// Fails when a value does not parse or `validate` rejects it.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("failed to load notifier configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Retry policy for the dispatcher.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff_base: self.backoff_base,
            max_delay: Duration::from_secs(self.retry_max_delay_seconds),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// HTTP client settings.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            connect_timeout: Duration::from_secs(self.delivery_connect_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Capability URL validity.
    pub fn presign_validity(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_seconds)
    }

    /// Where relay secrets are read from.
    pub fn credential_source(&self) -> Arc<dyn CredentialSource> {
        match &self.webhook_secret_path {
            Some(path) => Arc::new(FileCredentialSource::new(path.clone())),
            None => Arc::new(EnvCredentialSource),
        }
    }

    /// Builds the SigV4 presigner.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` without a key pair and `InvalidEndpoint`
    /// for an unusable `S3_ENDPOINT`.
    pub fn presigner(&self, clock: Arc<dyn Clock>) -> std::result::Result<SigV4Presigner, PresignError> {
        let mut identity =
            AwsIdentity::new(self.aws_access_key_id.clone(), self.aws_secret_access_key.clone());
        if let Some(token) = self.aws_session_token.as_ref().filter(|t| !t.is_empty()) {
            identity = identity.with_session_token(token.clone());
        }

        let presigner = SigV4Presigner::new(identity, self.aws_region.clone(), clock)?;
        match self.s3_endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => presigner.with_endpoint(endpoint),
            None => Ok(presigner),
        }
    }

    /// Validates configuration values.
    fn validate(&self) -> Result<()> {
        if self.aws_region.trim().is_empty() {
            anyhow::bail!("AWS_REGION is required");
        }

        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }

        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            anyhow::bail!("backoff_base must be at least 1.0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.presign_expiry_seconds == 0 || self.presign_expiry_seconds > MAX_VALIDITY_SECONDS {
            anyhow::bail!("presign_expiry_seconds must be between 1 and {MAX_VALIDITY_SECONDS}");
        }

        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }

        Ok(())
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            aws_region: String::new(),
            aws_access_key_id: String::new(),
            aws_secret_access_key: String::new(),
            aws_session_token: None,
            s3_endpoint: None,
            presign_expiry_seconds: default_presign_expiry(),
            webhook_secret_path: None,
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            retry_jitter_factor: 0.0,
            retry_max_delay_seconds: default_max_delay(),
            delivery_timeout_seconds: default_delivery_timeout(),
            delivery_connect_timeout_seconds: default_connect_timeout(),
            rust_log: default_log_level(),
        }
    }
}

fn default_presign_expiry() -> u64 {
    crate::DEFAULT_PRESIGN_EXPIRY_SECONDS
}

fn default_max_retries() -> u32 {
    crate::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    300
}

fn default_delivery_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use ferry_core::TestClock;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    fn valid() -> NotifierConfig {
        NotifierConfig { aws_region: "us-east-1".to_string(), ..Default::default() }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = valid();
        assert!(config.validate().is_ok());

        let policy = config.to_retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert!((policy.backoff_base - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.presign_validity(), Duration::from_secs(900));
        assert_eq!(config.to_client_config().timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_are_applied() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("AWS_REGION", "eu-central-1");
        guard.set_var("AWS_ACCESS_KEY_ID", "AKID");
        guard.set_var("AWS_SECRET_ACCESS_KEY", "secret");
        guard.set_var("MAX_RETRIES", "6");
        guard.set_var("BACKOFF_BASE", "3");
        guard.set_var("PRESIGN_EXPIRY_SECONDS", "3600");
        guard.set_var("S3_ENDPOINT", "http://localhost:9000");

        let config = NotifierConfig::load().expect("config should load with env overrides");

        assert_eq!(config.aws_region, "eu-central-1");
        assert_eq!(config.to_retry_policy().max_attempts, 6);
        assert_eq!(config.presign_validity(), Duration::from_secs(3600));

        let presigner = config.presigner(Arc::new(TestClock::new())).unwrap();
        assert_eq!(presigner.region(), "eu-central-1");
    }

    #[test]
    fn invalid_config_validation_fails() {
        assert!(NotifierConfig::default().validate().is_err());

        let mut config = valid();
        config.max_retries = 0;
        assert!(config.validate().is_err());

        config = valid();
        config.presign_expiry_seconds = MAX_VALIDITY_SECONDS + 1;
        assert!(config.validate().is_err());

        config = valid();
        config.presign_expiry_seconds = 0;
        assert!(config.validate().is_err());

        config = valid();
        config.backoff_base = 0.5;
        assert!(config.validate().is_err());

        config = valid();
        config.retry_jitter_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn presigner_requires_identity() {
        let result = valid().presigner(Arc::new(TestClock::new()));
        assert!(matches!(result, Err(PresignError::MissingIdentity)));
    }

    #[test]
    fn secret_keys_are_not_serialized() {
        let config = NotifierConfig {
            aws_secret_access_key: "top-secret".to_string(),
            aws_session_token: Some("token".to_string()),
            ..valid()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("top-secret"));
        assert!(!json.contains("\"token\""));
    }
}
