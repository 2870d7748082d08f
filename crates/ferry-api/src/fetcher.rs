//! Streaming download of objects through their capability URL.
//!
//! The capability is self-contained, so the request carries no
//! credentials of its own. Any non-2xx answer is fatal and nothing is
//! retried here: a failed transfer surfaces as a 5xx and the notifier
//! redelivers with a fresh URL.

use std::{fmt, future::Future, io, pin::Pin, time::Duration};

use futures::TryStreamExt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Readable body of a fetched object.
pub type ObjectStream = Pin<Box<dyn AsyncRead + Send>>;

/// Errors while opening an object stream.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is not an absolute http(s) URL.
    #[error("invalid capability URL: {message}")]
    InvalidUrl {
        /// Parse failure detail
        message: String,
    },

    /// Connection, TLS or timeout failure.
    #[error("object download failed: {message}")]
    Transport {
        /// Underlying error
        message: String,
    },

    /// Store answered with a non-2xx status.
    #[error("object store returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },
}

/// An object ready to be streamed.
pub struct FetchedObject {
    /// Body reader.
    pub reader: ObjectStream,
    /// `Content-Length`, when the store sent one.
    pub content_length: Option<u64>,
}

impl fmt::Debug for FetchedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedObject").field("content_length", &self.content_length).finish_non_exhaustive()
    }
}

/// Opens object streams from capability URLs.
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Issues a plain `GET` and returns the body as a stream.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedObject, FetchError>> + Send + 'a>>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a whole-download timeout and a connect
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Transport` if the TLS backend cannot be
    /// initialized.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("ferry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport { message: format!("failed to build HTTP client: {e}") })?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedObject, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| FetchError::InvalidUrl { message: e.to_string() })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(FetchError::InvalidUrl {
                    message: format!("unsupported scheme {}", parsed.scheme()),
                });
            }

            let response = self
                .client
                .get(parsed)
                .send()
                .await
                // The query string is a bearer capability; keep it out of errors and logs.
                .map_err(|e| FetchError::Transport { message: e.without_url().to_string() })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status { status: status.as_u16() });
            }

            let content_length = response.content_length();
            debug!(content_length, "object stream opened");

            let stream = response.bytes_stream().map_err(io::Error::other);
            Ok(FetchedObject { reader: Box::pin(StreamReader::new(stream)), content_length })
        })
    }
}
