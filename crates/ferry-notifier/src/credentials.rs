//! Relay secret loading and caching.
//!
//! The webhook URL, API key and signing key live outside the notifier's
//! static configuration: in production a mounted secret document, locally
//! plain `WEBHOOK_*` environment variables. `CredentialStore` loads them
//! once on first use and hands every later caller the same immutable
//! snapshot until `reload` swaps it.

use std::{fmt, future::Future, path::PathBuf, pin::Pin, sync::Arc};

use ferry_core::RelayCredentials;
use figment::{providers::Env, Figment};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Errors while loading relay secrets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The source could not be read or parsed.
    #[error("failed to load credentials from {source_name}: {message}")]
    Load {
        /// Which source failed
        source_name: String,
        /// Underlying error
        message: String,
    },

    /// The document parsed but some secrets are empty.
    #[error("credentials incomplete, empty fields: {}", .missing.join(", "))]
    Incomplete {
        /// Names of empty fields
        missing: Vec<&'static str>,
    },
}

impl CredentialError {
    fn load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load { source_name: source_name.into(), message: message.into() }
    }
}

/// Somewhere relay secrets can be read from.
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Short name for logs and errors.
    fn name(&self) -> String;

    /// Reads the current secrets.
    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<RelayCredentials, CredentialError>> + Send + '_>>;
}

/// Reads `WEBHOOK_URL`, `WEBHOOK_API_KEY` and `WEBHOOK_SIGNING_KEY`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn name(&self) -> String {
        "environment".to_string()
    }

    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<RelayCredentials, CredentialError>> + Send + '_>> {
        Box::pin(async move {
            Figment::new()
                .merge(Env::prefixed("WEBHOOK_"))
                .extract::<RelayCredentials>()
                .map_err(|e| CredentialError::load(self.name(), e.to_string()))
        })
    }
}

/// Reads a JSON secret document from disk.
///
/// Accepts `webhook_url`/`webhookUrl`/`url`, `api_key`/`apiKey`, and
/// `signing_key`/`signingKey`/`hmac_secret`.
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    path: PathBuf,
}

impl FileCredentialSource {
    /// Creates a source for the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for FileCredentialSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<RelayCredentials, CredentialError>> + Send + '_>> {
        Box::pin(async move {
            let raw = tokio::fs::read(&self.path)
                .await
                .map_err(|e| CredentialError::load(self.name(), e.to_string()))?;
            serde_json::from_slice(&raw).map_err(|e| CredentialError::load(self.name(), e.to_string()))
        })
    }
}

/// Fixed secrets, for wiring tests and embedding.
#[derive(Debug, Clone)]
pub struct StaticCredentialSource {
    credentials: RelayCredentials,
}

impl StaticCredentialSource {
    /// Wraps an already-known credential set.
    pub fn new(credentials: RelayCredentials) -> Self {
        Self { credentials }
    }
}

impl CredentialSource for StaticCredentialSource {
    fn name(&self) -> String {
        "static".to_string()
    }

    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<RelayCredentials, CredentialError>> + Send + '_>> {
        let credentials = self.credentials.clone();
        Box::pin(async move { Ok(credentials) })
    }
}

/// Lazily loaded, shared, read-only relay secrets.
#[derive(Debug)]
pub struct CredentialStore {
    source: Arc<dyn CredentialSource>,
    cached: RwLock<Option<Arc<RelayCredentials>>>,
}

impl CredentialStore {
    /// Creates a store that has not loaded anything yet.
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source, cached: RwLock::new(None) }
    }

    /// Returns the cached secrets, loading them on first use.
    ///
    /// # Errors
    ///
    /// Returns the source's error, or `CredentialError::Incomplete` when a
    /// secret is empty. Failures are not cached, so a later call retries.
    pub async fn get(&self) -> Result<Arc<RelayCredentials>, CredentialError> {
        if let Some(credentials) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(credentials));
        }

        let mut slot = self.cached.write().await;
        if let Some(credentials) = slot.as_ref() {
            return Ok(Arc::clone(credentials));
        }

        let credentials = Arc::new(self.fetch().await?);
        *slot = Some(Arc::clone(&credentials));
        debug!(source = %self.source.name(), "relay credentials loaded");
        Ok(credentials)
    }

    /// Re-reads the source and replaces the snapshot.
    ///
    /// Callers holding the previous `Arc` keep using it until they finish.
    ///
    /// # Errors
    ///
    /// Returns the load error and leaves the previous snapshot in place.
    pub async fn reload(&self) -> Result<Arc<RelayCredentials>, CredentialError> {
        let credentials = Arc::new(self.fetch().await?);
        *self.cached.write().await = Some(Arc::clone(&credentials));
        info!(source = %self.source.name(), "relay credentials reloaded");
        Ok(credentials)
    }

    async fn fetch(&self) -> Result<RelayCredentials, CredentialError> {
        let credentials = self.source.load().await?;
        let missing = credentials.missing_fields();
        if !missing.is_empty() {
            return Err(CredentialError::Incomplete { missing });
        }
        Ok(credentials)
    }
}
