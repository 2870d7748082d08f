//! Remote file placement over SFTP.
//!
//! An uploader is a stateful session: `connect`, then any number of
//! `upload`s, then `close`. Every method takes `&mut self`, so a single
//! instance can only be driven by one caller at a time. Request handlers
//! never share one; they ask an `UploaderFactory` for a fresh instance.
//!
//! Remote layout is `{base}/{YYYY}/{MM}/{DD}/{file name}` using the object's
//! creation date, so redelivery of the same event overwrites the same file.

use std::{
    fmt,
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use russh::{
    client::{self, Handle},
    keys::{HashAlg, PublicKey},
    Disconnect,
};
use russh_sftp::client::SftpSession;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, info_span, warn, Instrument};

/// Future returned by uploader methods.
pub type UploadFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Reader handed to [`RemoteUploader::upload`].
pub type UploadSource<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Errors from the remote file server, each with the remote path or
/// endpoint involved.
#[derive(Debug, Error)]
pub enum UploadError {
    /// TCP or SSH handshake failed.
    #[error("failed to connect to {endpoint}: {message}")]
    Connect {
        /// `host:port`
        endpoint: String,
        /// Underlying error
        message: String,
    },

    /// Server rejected the credentials.
    #[error("authentication rejected for {user}@{endpoint}")]
    Authentication {
        /// Login user
        user: String,
        /// `host:port`
        endpoint: String,
    },

    /// A parent directory could not be created.
    #[error("failed to create directory {path}: {message}")]
    CreateDirectory {
        /// Directory path
        path: String,
        /// Underlying error
        message: String,
    },

    /// The remote file could not be opened for writing.
    #[error("failed to create remote file {path}: {message}")]
    CreateFile {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// Streaming into the remote file failed.
    #[error("failed to copy into {path} after {bytes_written} bytes: {message}")]
    Copy {
        /// File path
        path: String,
        /// Bytes written before the failure
        bytes_written: u64,
        /// Underlying error
        message: String,
    },

    /// Session teardown failed.
    #[error("failed to close session: {message}")]
    Close {
        /// Underlying error
        message: String,
    },

    /// `upload` was called without a live session.
    #[error("uploader is not connected")]
    NotConnected,
}

/// Bytes written and time spent by one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    /// Bytes copied to the remote file.
    pub bytes_written: u64,
    /// Wall-clock time of directory creation plus copy.
    pub elapsed: Duration,
}

/// A stateful connection to a remote file server.
pub trait RemoteUploader: Send {
    /// Opens the session.
    fn connect(&mut self) -> UploadFuture<'_, ()>;

    /// Creates missing parent directories of `remote_path`, then streams
    /// `source` into it, replacing any existing file.
    fn upload<'a>(
        &'a mut self,
        source: UploadSource<'a>,
        remote_path: &'a str,
    ) -> UploadFuture<'a, UploadStats>;

    /// Releases the session. Safe to call when not connected.
    fn close(&mut self) -> UploadFuture<'_, ()>;
}

/// Produces a fresh, unconnected uploader per transfer.
pub trait UploaderFactory: Send + Sync + fmt::Debug {
    /// Creates an uploader that nobody else holds.
    fn create(&self) -> Box<dyn RemoteUploader>;
}

/// Date-partitioned destination path for an object.
///
/// Uses the last segment of `key` as the file name.
pub fn remote_path(base_dir: &str, key: &str, created_at: DateTime<Utc>) -> String {
    let base = base_dir.trim_end_matches('/');
    let file_name = key.rsplit('/').next().unwrap_or(key);
    format!("{base}/{}/{file_name}", created_at.format("%Y/%m/%d"))
}

/// Every ancestor directory of `path`, shortest first.
///
/// `/upload/2024/05/17/a.csv` yields `/upload`, `/upload/2024`,
/// `/upload/2024/05`, `/upload/2024/05/17`.
pub fn parent_directories(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((_, dirs)) = segments.split_last() else {
        return Vec::new();
    };

    let mut current = String::new();
    dirs.iter()
        .map(|segment| {
            if absolute || !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            current.clone()
        })
        .collect()
}

/// Connection settings for the SFTP destination.
#[derive(Clone)]
pub struct SftpSettings {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Bound on TCP connect plus SSH handshake plus authentication.
    pub connect_timeout: Duration,
    /// Expected `SHA256:` host key fingerprint; any key is accepted when
    /// unset.
    pub host_key_fingerprint: Option<String>,
}

impl SftpSettings {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SftpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("connect_timeout", &self.connect_timeout)
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .finish()
    }
}

/// Host key policy for the SSH client.
#[derive(Debug, Clone)]
struct HostKeyCheck {
    expected: Option<String>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.expected {
            Some(expected) if *expected != fingerprint => {
                warn!(%fingerprint, %expected, "SFTP host key does not match pinned fingerprint");
                Ok(false)
            },
            Some(_) => Ok(true),
            None => {
                debug!(%fingerprint, "accepting SFTP host key without pinning");
                Ok(true)
            },
        }
    }
}

struct SftpConnection {
    handle: Handle<HostKeyCheck>,
    sftp: SftpSession,
}

/// `russh`-backed SFTP uploader.
pub struct SftpUploader {
    settings: Arc<SftpSettings>,
    connection: Option<SftpConnection>,
}

impl fmt::Debug for SftpUploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpUploader")
            .field("endpoint", &self.settings.endpoint())
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl SftpUploader {
    /// Creates an unconnected uploader.
    pub fn new(settings: Arc<SftpSettings>) -> Self {
        Self { settings, connection: None }
    }

    async fn open(settings: &SftpSettings) -> Result<SftpConnection, UploadError> {
        let endpoint = settings.endpoint();
        let connect_error =
            |message: String| UploadError::Connect { endpoint: endpoint.clone(), message };

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(300)),
            ..Default::default()
        });
        let handler = HostKeyCheck { expected: settings.host_key_fingerprint.clone() };

        let mut handle = client::connect(config, (settings.host.as_str(), settings.port), handler)
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        let auth = handle
            .authenticate_password(settings.user.clone(), settings.password.clone())
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        if !auth.success() {
            return Err(UploadError::Authentication {
                user: settings.user.clone(),
                endpoint: endpoint.clone(),
            });
        }

        let channel = handle.channel_open_session().await.map_err(|e| connect_error(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        Ok(SftpConnection { handle, sftp })
    }
}

impl RemoteUploader for SftpUploader {
    fn connect(&mut self) -> UploadFuture<'_, ()> {
        Box::pin(async move {
            if self.connection.is_some() {
                return Ok(());
            }

            let endpoint = self.settings.endpoint();
            let timeout = self.settings.connect_timeout;
            let connection = tokio::time::timeout(timeout, Self::open(&self.settings))
                .await
                .map_err(|_| UploadError::Connect {
                    endpoint: endpoint.clone(),
                    message: format!("timed out after {}s", timeout.as_secs()),
                })??;

            debug!(%endpoint, "SFTP session established");
            self.connection = Some(connection);
            Ok(())
        })
    }

    fn upload<'a>(
        &'a mut self,
        source: UploadSource<'a>,
        remote_path: &'a str,
    ) -> UploadFuture<'a, UploadStats> {
        let span = info_span!("sftp_upload", remote_path = %remote_path);

        Box::pin(
            async move {
                let connection = self.connection.as_mut().ok_or(UploadError::NotConnected)?;
                let started = Instant::now();

                for dir in parent_directories(remote_path) {
                    ensure_directory(&connection.sftp, &dir).await?;
                }

                let file = connection.sftp.create(remote_path).await.map_err(|e| {
                    UploadError::CreateFile { path: remote_path.to_string(), message: e.to_string() }
                })?;

                let mut file = CountingWriter::new(file);
                let copied = tokio::io::copy(source, &mut file).await;
                let shutdown = file.shutdown().await;

                let bytes_written = copied.map_err(|e| UploadError::Copy {
                    path: remote_path.to_string(),
                    bytes_written: file.written(),
                    message: e.to_string(),
                })?;
                shutdown.map_err(|e| UploadError::Copy {
                    path: remote_path.to_string(),
                    bytes_written,
                    message: format!("flush failed: {e}"),
                })?;

                let elapsed = started.elapsed();
                info!(bytes_written, elapsed_ms = elapsed.as_millis(), "upload complete");
                Ok(UploadStats { bytes_written, elapsed })
            }
            .instrument(span),
        )
    }

    fn close(&mut self) -> UploadFuture<'_, ()> {
        Box::pin(async move {
            let Some(connection) = self.connection.take() else {
                return Ok(());
            };

            let sftp_closed = connection.sftp.close().await;
            let disconnected = connection
                .handle
                .disconnect(Disconnect::ByApplication, "transfer complete", "en")
                .await;

            sftp_closed.map_err(|e| UploadError::Close { message: e.to_string() })?;
            disconnected.map_err(|e| UploadError::Close { message: e.to_string() })?;
            debug!(endpoint = %self.settings.endpoint(), "SFTP session closed");
            Ok(())
        })
    }
}

/// Counts bytes accepted by the inner writer, so a failed copy can report
/// how far it got.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    fn written(&self) -> u64 {
        self.written
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.written += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Creates `dir` unless it already exists.
async fn ensure_directory(sftp: &SftpSession, dir: &str) -> Result<(), UploadError> {
    match sftp.try_exists(dir).await {
        Ok(true) => return Ok(()),
        Ok(false) => {},
        Err(e) => {
            debug!(%dir, error = %e, "existence check failed, attempting create");
        },
    }

    if let Err(e) = sftp.create_dir(dir).await {
        // Lost a race with a concurrent transfer creating the same directory.
        if matches!(sftp.try_exists(dir).await, Ok(true)) {
            return Ok(());
        }
        return Err(UploadError::CreateDirectory { path: dir.to_string(), message: e.to_string() });
    }
    Ok(())
}

/// Hands out one `SftpUploader` per transfer.
#[derive(Debug, Clone)]
pub struct SftpUploaderFactory {
    settings: Arc<SftpSettings>,
}

impl SftpUploaderFactory {
    /// Creates a factory for the given destination.
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings: Arc::new(settings) }
    }
}

impl UploaderFactory for SftpUploaderFactory {
    fn create(&self) -> Box<dyn RemoteUploader> {
        Box::new(SftpUploader::new(Arc::clone(&self.settings)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn remote_path_is_date_partitioned() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 17, 23, 59, 59).unwrap();
        assert_eq!(
            remote_path("/upload", "uploads/report.csv", created_at),
            "/upload/2024/05/17/report.csv"
        );
        assert_eq!(remote_path("/upload/", "report.csv", created_at), "/upload/2024/05/17/report.csv");
    }

    #[test]
    fn parents_are_listed_shortest_first() {
        assert_eq!(
            parent_directories("/upload/2024/05/17/report.csv"),
            vec!["/upload", "/upload/2024", "/upload/2024/05", "/upload/2024/05/17"]
        );
        assert_eq!(parent_directories("relative/dir/file"), vec!["relative", "relative/dir"]);
        assert!(parent_directories("file.txt").is_empty());
    }

    #[tokio::test]
    async fn upload_without_connect_is_rejected() {
        let mut uploader = SftpUploader::new(Arc::new(SftpSettings {
            host: "127.0.0.1".to_string(),
            port: 22,
            user: "u".to_string(),
            password: "p".to_string(),
            connect_timeout: Duration::from_secs(1),
            host_key_fingerprint: None,
        }));

        let mut source: &[u8] = b"data";
        let error = uploader.upload(&mut source, "/upload/x").await.unwrap_err();
        assert!(matches!(error, UploadError::NotConnected));
        assert!(uploader.close().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_server_is_connect_error() {
        let mut uploader = SftpUploaderFactory::new(SftpSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "u".to_string(),
            password: "p".to_string(),
            connect_timeout: Duration::from_secs(2),
            host_key_fingerprint: None,
        })
        .create();

        let error = uploader.connect().await.unwrap_err();
        assert!(matches!(error, UploadError::Connect { .. }), "{error}");
        assert!(uploader.close().await.is_ok());
    }

    /// Accepts `limit` bytes, then fails every write.
    struct FailAfter {
        limit: usize,
        accepted: usize,
    }

    impl AsyncWrite for FailAfter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let room = self.limit - self.accepted;
            if room == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed")));
            }
            let n = room.min(buf.len());
            self.accepted += n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn counting_writer_reports_partial_progress() {
        let mut source: &[u8] = &[1u8; 1000];
        let mut writer = CountingWriter::new(FailAfter { limit: 300, accepted: 0 });

        assert!(tokio::io::copy(&mut source, &mut writer).await.is_err());
        assert_eq!(writer.written(), 300);

        let mut source: &[u8] = &[1u8; 1000];
        let mut complete = CountingWriter::new(Vec::new());
        assert_eq!(tokio::io::copy(&mut source, &mut complete).await.unwrap(), 1000);
        assert_eq!(complete.written(), 1000);
    }

    #[test]
    fn settings_debug_hides_password() {
        let settings = SftpSettings {
            host: "sftp.example.com".to_string(),
            port: 22,
            user: "relay".to_string(),
            password: "hunter2".to_string(),
            connect_timeout: Duration::from_secs(10),
            host_key_fingerprint: None,
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }

    proptest! {
        #[test]
        fn remote_path_is_deterministic_and_rooted(
            segments in prop::collection::vec("[a-zA-Z0-9_.-]{1,12}", 1..5),
            secs in 0i64..4_000_000_000,
        ) {
            let key = segments.join("/");
            let created_at = Utc.timestamp_opt(secs, 0).unwrap();

            let path = remote_path("/upload", &key, created_at);
            prop_assert_eq!(&path, &remote_path("/upload", &key, created_at));
            prop_assert!(path.starts_with("/upload/"));
            prop_assert!(path.ends_with(segments.last().unwrap().as_str()));
            prop_assert_eq!(parent_directories(&path).len(), 4);
        }
    }
}
