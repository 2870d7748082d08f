//! HMAC-SHA256 signing shared by the notifier and the receiver.
//!
//! The signature always covers the literal bytes put on the wire. The
//! receiver verifies against the raw request body it was handed, never
//! against a re-serialized struct, so field order and whitespace are part
//! of what is authenticated.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded SHA-256 MAC.
pub const SIGNATURE_HEX_LEN: usize = 64;

/// Signature generation and verification errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature header missing or empty.
    MissingSignature,
    /// Signature is not a 64 character hex string.
    InvalidFormat(String),
    /// Signature does not match the payload.
    VerificationFailed,
    /// Signing key is empty.
    InvalidSecret,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSignature => write!(f, "signature header missing"),
            Self::InvalidFormat(detail) => write!(f, "invalid signature format: {detail}"),
            Self::VerificationFailed => write!(f, "signature verification failed"),
            Self::InvalidSecret => write!(f, "invalid signing key"),
        }
    }
}

impl std::error::Error for SignatureError {}

fn mac_for(key: &str) -> Result<HmacSha256, SignatureError> {
    if key.is_empty() {
        return Err(SignatureError::InvalidSecret);
    }
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| SignatureError::InvalidSecret)
}

/// Computes the lowercase hex HMAC-SHA256 of `payload` under `key`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the key is empty.
pub fn sign_hex(payload: &[u8], key: &str) -> Result<String, SignatureError> {
    let mut mac = mac_for(key)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex signature over the exact `payload` bytes.
///
/// Accepts raw hex or the `sha256=<hex>` form. The MAC comparison runs in
/// constant time.
///
/// # Errors
///
/// Returns the reason verification failed.
pub fn verify_hex(payload: &[u8], signature: &str, key: &str) -> Result<(), SignatureError> {
    let signature = signature.trim();
    if signature.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    if hex_part.len() != SIGNATURE_HEX_LEN {
        return Err(SignatureError::InvalidFormat(format!(
            "expected {SIGNATURE_HEX_LEN} hex characters, got {}",
            hex_part.len()
        )));
    }

    let expected = hex::decode(hex_part)
        .map_err(|e| SignatureError::InvalidFormat(format!("not hex: {e}")))?;

    let mut mac = mac_for(key)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| SignatureError::VerificationFailed)
}

/// Constant-time equality for secrets of possibly different lengths.
///
/// The length check leaks only the length, which for API keys is fixed by
/// configuration anyway.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
