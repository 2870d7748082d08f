//! Core domain types for the ferry object relay.
//!
//! Holds the immutable event model shared by the producer (notifier) and the
//! consumer (receiver), the error taxonomy with stable codes, the HMAC
//! primitives both sides sign and verify with, and the clock abstraction
//! that lets retry and freshness logic run in virtual time under test.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod error;
pub mod models;
pub mod time;

pub use error::{RelayError, Result, TransferStage};
pub use models::{
    CapabilityUrl, IncomingPayload, ObjectCreated, ObjectEvent, RelayCredentials, RelayResponse,
    TransferResult,
};
pub use time::{Clock, RealClock, TestClock};
