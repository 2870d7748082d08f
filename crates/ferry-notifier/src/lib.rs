//! Producer side of the relay.
//!
//! Reacts to one object-created notification at a time: mints a capability
//! URL for the object, signs the event with the relay's HMAC key, and posts
//! it to the receiver with bounded exponential backoff.
//!
//! # Flow
//!
//! 1. **Received** - a bus envelope is parsed into an `ObjectCreated`
//! 2. **URL generated** - `Presigner` mints a read-only, expiring URL
//! 3. **Dispatching** - `WebhookDispatcher` signs the wire bytes and posts
//!    them, sleeping `base^attempt` seconds between attempts
//! 4. **Delivered** or **Exhausted** - exhausted events go to the
//!    `DeadLetterSink` and the error propagates to the caller
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ferry_core::RealClock;
//! use ferry_notifier::{BusEnvelope, Notifier, NotifierConfig};
//!
//! # async fn example(raw_event: &[u8]) -> anyhow::Result<()> {
//! let config = NotifierConfig::load()?;
//! let notifier = Notifier::from_config(&config, Arc::new(RealClock::new()))?;
//!
//! let object = BusEnvelope::parse(raw_event)?.into_object()?;
//! let outcome = notifier.handle(object).await?;
//! println!("delivered after {} attempts", outcome.attempts);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod credentials;
pub mod dead_letter;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod notifier;
pub mod presign;
pub mod retry;

pub use config::NotifierConfig;
pub use credentials::{
    CredentialError, CredentialSource, CredentialStore, EnvCredentialSource, FileCredentialSource,
    StaticCredentialSource,
};
pub use dead_letter::{DeadLetter, DeadLetterSink, LogDeadLetterSink};
pub use dispatcher::{DispatchReport, WebhookDispatcher};
pub use envelope::BusEnvelope;
pub use error::{DeliveryError, NotifyError, Result};
pub use notifier::{Notifier, NotifierState, NotifyOutcome};
pub use presign::{AwsIdentity, CapabilityDenied, PresignError, Presigner, SigV4Presigner};
pub use retry::{backoff_delay, RetryPolicy};

/// Default capability URL validity window in seconds.
pub const DEFAULT_PRESIGN_EXPIRY_SECONDS: u64 = 900;

/// Default number of webhook delivery attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
