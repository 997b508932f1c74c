//! Cryptographic utilities for webhook verification.
//!
//! Payment webhooks carry a `Payment-Signature` header of the form
//! `t=<unix seconds>,v1=<hex>` where the hex value is
//! HMAC-SHA256(secret, `"<t>.<raw body>"`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Webhook signature verification errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The header is missing a timestamp or signature.
    #[error("malformed signature header")]
    Malformed,

    /// The timestamp is outside the accepted window.
    #[error("signature timestamp outside tolerance")]
    Expired,

    /// No signature matches the body.
    #[error("signature mismatch")]
    Mismatch,
}

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Panics
///
/// This function will never panic in practice. The `expect` call is guarded by
/// the invariant that HMAC-SHA256 accepts keys of any size per RFC 2104.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104, so
    // `new_from_slice` only fails if the Hmac implementation is broken.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Build a `Payment-Signature` header value for `body` at `timestamp`.
#[must_use]
pub fn sign_payment_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{body}"));
    format!("t={timestamp},v1={signature}")
}

/// Verify a `Payment-Signature` header against the raw body.
///
/// Several `v1` values may be present during secret rotation; any match is
/// accepted.
///
/// # Errors
///
/// Returns a [`SignatureError`] if the header is malformed, too old or too
/// far in the future, or no signature matches.
pub fn verify_payment_signature(
    secret: &str,
    header: &str,
    body: &str,
    tolerance_seconds: u64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    if now.abs_diff(timestamp) > tolerance_seconds {
        return Err(SignatureError::Expired);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{body}"));
    if signatures
        .iter()
        .any(|candidate| constant_time_eq(candidate, &expected))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
