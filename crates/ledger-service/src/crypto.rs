//! Webhook signature verification.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed age of a signed webhook timestamp.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Compute HMAC-SHA256 and return the hex-encoded result.
///
/// # Panics
///
/// Never panics in practice; HMAC-SHA256 accepts keys of any size per
/// RFC 2104, so `new_from_slice` cannot fail.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison for signature checks.
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

/// Verify a `Stripe-Signature` header against the raw payload.
///
/// The header carries `t=<unix ts>,v1=<hex>[,v1=<hex>...]`; the signed
/// message is `"{t}.{payload}"`. Rejects timestamps older than
/// [`SIGNATURE_TOLERANCE_SECS`] to limit replay.
pub fn verify_stripe_signature(
    secret: &str,
    payload: &str,
    header: &str,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(ts)) => timestamp = Some(ts),
            (Some("v1"), Some(sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::Invalid);
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MissingTimestamp)?;
    if (now.timestamp() - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"));
    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Invalid)
    }
}

/// Why a webhook signature was rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    /// The signature header had no `t=` component.
    #[error("missing signature timestamp")]
    MissingTimestamp,
    /// The signed timestamp is outside the tolerance window.
    #[error("signature timestamp outside tolerance")]
    Expired,
    /// No `v1` signature matched the payload.
    #[error("invalid signature")]
    Invalid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_produces_correct_length() {
        let result = hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog");
        assert_eq!(result.len(), 64);
    }

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }

    #[test]
    fn stripe_signature_round_trip() {
        let now = Utc::now();
        let payload = r#"{"id":"evt_1"}"#;
        let ts = now.timestamp();
        let sig = hmac_sha256_hex("whsec_test", &format!("{ts}.{payload}"));
        let header = format!("t={ts},v1={sig}");

        assert_eq!(
            verify_stripe_signature("whsec_test", payload, &header, now),
            Ok(())
        );
    }

    #[test]
    fn stripe_signature_rejects_tampered_payload() {
        let now = Utc::now();
        let ts = now.timestamp();
        let sig = hmac_sha256_hex("whsec_test", &format!("{ts}.original"));
        let header = format!("t={ts},v1={sig}");

        assert_eq!(
            verify_stripe_signature("whsec_test", "tampered", &header, now),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn stripe_signature_rejects_stale_timestamp() {
        let now = Utc::now();
        let ts = now.timestamp() - SIGNATURE_TOLERANCE_SECS - 1;
        let payload = "{}";
        let sig = hmac_sha256_hex("whsec_test", &format!("{ts}.{payload}"));
        let header = format!("t={ts},v1={sig}");

        assert_eq!(
            verify_stripe_signature("whsec_test", payload, &header, now),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn stripe_signature_missing_timestamp() {
        assert_eq!(
            verify_stripe_signature("whsec_test", "{}", "v1=deadbeef", Utc::now()),
            Err(SignatureError::MissingTimestamp)
        );
    }
}
