//! Fetcher that serves canned objects and counts calls.
//!
//! It can also be made slow or made to panic, to exercise the transfer
//! deadline and the router's panic boundary.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use ferry_api::fetcher::{FetchError, FetchedObject, Fetcher};

/// Serves registered URLs from memory; unknown URLs answer `404`.
#[derive(Debug, Clone, Default)]
pub struct RecordingFetcher {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    calls: Arc<AtomicUsize>,
    delay: Arc<Mutex<Option<Duration>>>,
    panics: Arc<AtomicBool>,
}

impl RecordingFetcher {
    /// Creates a fetcher with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `body` under `url`.
    pub fn serve(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.into(), body.into());
    }

    /// Sleeps this long before answering each `fetch`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Makes `fetch` panic, as a bug in a collaborator would.
    pub fn set_panics(&self, panics: bool) {
        self.panics.store(panics, Ordering::SeqCst);
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for RecordingFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FetchedObject, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!self.panics.load(Ordering::SeqCst), "fetcher failure injected for {url}");

            let delay = *self.delay.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let body = self
                .objects
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(url)
                .cloned()
                .ok_or(FetchError::Status { status: 404 })?;

            let content_length = Some(body.len() as u64);
            Ok(FetchedObject { reader: Box::pin(std::io::Cursor::new(body)), content_length })
        })
    }
}
