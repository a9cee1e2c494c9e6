//! Webhook signature verification.
//!
//! The provider signs every delivery with a header of the form
//! `t=<unix seconds>,v1=<hex hmac>[,v1=...]`, where each `v1` is
//! HMAC-SHA256 over `"{t}.{raw body}"` keyed with the endpoint secret. More
//! than one `v1` appears while a secret is being rolled.

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Name of the signature header.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Why a webhook signature was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header: {0}")]
    Malformed(&'static str),
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no signature matches the payload")]
    Mismatch,
}

/// Verify `header` against the raw request bytes.
///
/// Returns the signed timestamp on success. The HMAC is computed over the
/// exact bytes received, never over a re-serialized body.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing why the delivery is not authentic.
pub fn verify(
    secret: &SecretString,
    header: Option<&str>,
    payload: &[u8],
    tolerance: Duration,
    now: i64,
) -> Result<i64, SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Malformed("timestamp is not an integer"))?,
                );
            }
            Some(("v1", value)) => {
                // Undecodable candidates can never match; skip them.
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed("missing t="))?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed("missing v1="));
    }

    if now.saturating_sub(timestamp).unsigned_abs() > tolerance.as_secs() {
        return Err(SignatureError::Expired);
    }

    let mac = signed_mac(secret, timestamp, payload);
    // `verify_slice` compares in constant time.
    if candidates
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok())
    {
        Ok(timestamp)
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a valid signature header for `payload`, as the provider would.
///
/// Used by tests and local tooling to produce signed deliveries.
#[must_use]
pub fn sign(secret: &SecretString, timestamp: i64, payload: &[u8]) -> String {
    let digest = signed_mac(secret, timestamp, payload).finalize().into_bytes();
    format!("t={timestamp},v1={}", hex::encode(digest))
}

fn signed_mac(secret: &SecretString, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.expose_secret().as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}
