//! In-memory stand-in for the SFTP destination.
//!
//! All uploaders created by one `MemoryUploaderFactory` write into the same
//! `MemoryFileSystem`, like concurrent sessions against one server. Each
//! uploader still carries its own connection flag, so the per-instance
//! connect, upload, close discipline is enforced exactly as with SFTP.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Instant,
};

use ferry_api::uploader::{
    parent_directories, RemoteUploader, UploadError, UploadFuture, UploadSource, UploadStats,
    UploaderFactory,
};
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 256;

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

/// Shared remote file tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryFileSystem {
    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Contents of the file at `path`.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Every file path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Whether `path` was created as a directory.
    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    /// Pre-creates a directory, as if made by an earlier transfer.
    pub fn mkdir(&self, path: &str) {
        self.lock().dirs.insert(path.to_string());
    }
}

/// Call counters across every uploader of a factory.
#[derive(Debug, Default)]
pub struct UploaderCounters {
    created: AtomicUsize,
    connects: AtomicUsize,
    uploads: AtomicUsize,
    closes: AtomicUsize,
    mkdirs: AtomicUsize,
}

impl UploaderCounters {
    /// Uploaders handed out.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Successful `connect` calls.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// `upload` calls, successful or not.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// `close` calls that released a live session.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Directories actually created (existing ones are skipped).
    pub fn mkdirs(&self) -> usize {
        self.mkdirs.load(Ordering::SeqCst)
    }

    /// True when nothing touched the destination.
    pub fn untouched(&self) -> bool {
        self.created() == 0 && self.connects() == 0 && self.uploads() == 0
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: AtomicBool,
    read_only: AtomicBool,
}

/// Factory of in-memory uploaders sharing one file tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryUploaderFactory {
    fs: MemoryFileSystem,
    counters: Arc<UploaderCounters>,
    faults: Arc<Faults>,
}

impl MemoryUploaderFactory {
    /// Creates a factory over an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared file tree.
    pub fn fs(&self) -> &MemoryFileSystem {
        &self.fs
    }

    /// Shared counters.
    pub fn counters(&self) -> &UploaderCounters {
        &self.counters
    }

    /// Makes `connect` fail, as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes file creation fail after directories are made.
    pub fn set_read_only(&self, read_only: bool) {
        self.faults.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl UploaderFactory for MemoryUploaderFactory {
    fn create(&self) -> Box<dyn RemoteUploader> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MemoryUploader {
            fs: self.fs.clone(),
            counters: Arc::clone(&self.counters),
            faults: Arc::clone(&self.faults),
            connected: false,
        })
    }
}

struct MemoryUploader {
    fs: MemoryFileSystem,
    counters: Arc<UploaderCounters>,
    faults: Arc<Faults>,
    connected: bool,
}

impl RemoteUploader for MemoryUploader {
    fn connect(&mut self) -> UploadFuture<'_, ()> {
        Box::pin(async move {
            if self.faults.unreachable.load(Ordering::SeqCst) {
                return Err(UploadError::Connect {
                    endpoint: "memory:22".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            self.connected = true;
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn upload<'a>(
        &'a mut self,
        source: UploadSource<'a>,
        remote_path: &'a str,
    ) -> UploadFuture<'a, UploadStats> {
        Box::pin(async move {
            self.counters.uploads.fetch_add(1, Ordering::SeqCst);
            if !self.connected {
                return Err(UploadError::NotConnected);
            }
            let started = Instant::now();

            for dir in parent_directories(remote_path) {
                if self.fs.lock().dirs.insert(dir) {
                    self.counters.mkdirs.fetch_add(1, Ordering::SeqCst);
                }
            }

            if self.faults.read_only.load(Ordering::SeqCst) {
                return Err(UploadError::CreateFile {
                    path: remote_path.to_string(),
                    message: "permission denied".to_string(),
                });
            }

            let mut contents = Vec::new();
            let mut chunk = [0u8; CHUNK_SIZE];
            loop {
                let read = source.read(&mut chunk).await.map_err(|e| UploadError::Copy {
                    path: remote_path.to_string(),
                    bytes_written: contents.len() as u64,
                    message: e.to_string(),
                })?;
                if read == 0 {
                    break;
                }
                contents.extend_from_slice(&chunk[..read]);
                tokio::task::yield_now().await;
            }

            let bytes_written = contents.len() as u64;
            self.fs.lock().files.insert(remote_path.to_string(), contents);
            Ok(UploadStats { bytes_written, elapsed: started.elapsed() })
        })
    }

    fn close(&mut self) -> UploadFuture<'_, ()> {
        Box::pin(async move {
            if std::mem::take(&mut self.connected) {
                self.counters.closes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_directories_are_not_an_error() {
        let factory = MemoryUploaderFactory::new();
        factory.fs().mkdir("/upload");

        for _ in 0..2 {
            let mut uploader = factory.create();
            uploader.connect().await.unwrap();
            let mut source: &[u8] = b"abc";
            uploader.upload(&mut source, "/upload/2024/05/17/a.csv").await.unwrap();
            uploader.close().await.unwrap();
        }

        assert_eq!(factory.counters().mkdirs(), 3);
        assert_eq!(factory.fs().file("/upload/2024/05/17/a.csv").unwrap(), b"abc");
        assert_eq!(factory.counters().closes(), 2);
    }

    #[tokio::test]
    async fn upload_requires_connect() {
        let factory = MemoryUploaderFactory::new();
        let mut uploader = factory.create();
        let mut source: &[u8] = b"abc";

        let error = uploader.upload(&mut source, "/upload/a").await.unwrap_err();
        assert!(matches!(error, UploadError::NotConnected));
        assert!(factory.fs().paths().is_empty());
    }
}
