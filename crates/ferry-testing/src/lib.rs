//! Test infrastructure for the ferry receiver.
//!
//! Provides an in-memory SFTP stand-in, a fetcher that serves canned
//! objects and counts calls, signed webhook builders, and a `TestEnv` that
//! wires the real router and orchestrator around those fakes under a
//! deterministic clock.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod env;
pub mod fetcher;
pub mod fixtures;
pub mod uploader;

pub use env::{TestEnv, TestResponse, API_KEY, BASE_DIR, RELAY_NAME, SIGNING_KEY};
pub use ferry_core::TestClock;
pub use fetcher::RecordingFetcher;
pub use fixtures::{object_url, EventBuilder, SignedWebhook};
pub use uploader::{MemoryFileSystem, MemoryUploaderFactory, UploaderCounters};
