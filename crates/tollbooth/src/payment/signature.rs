//! Webhook delivery signatures: `Stripe-Signature: t=<unix>,v1=<hex>`,
//! HMAC-SHA-256 over `"{t}.{payload}"`, with a bounded timestamp skew.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header")]
    Malformed,

    #[error("timestamp outside tolerance")]
    TimestampOutOfRange,

    #[error("no matching signature")]
    NoMatch,
}

/// Verify a delivery. `tolerance_secs` bounds how far the embedded
/// timestamp may drift from `now` in either direction.
pub fn verify(
    secret: &str,
    header: &str,
    payload: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let (timestamp, candidates) = parse_header(header)?;

    if (now - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutOfRange);
    }

    for candidate in candidates {
        let Ok(digest) = hex::decode(&candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&digest).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::NoMatch)
}

/// Produce a header value the way the provider does. The webhook tests and
/// local tooling sign their fixtures with this.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let digest = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={digest}")
}

fn parse_header(header: &str) -> Result<(i64, Vec<String>), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::Malformed)?);
            }
            Some(("v1", value)) => candidates.push(value.to_string()),
            // Unknown schemes (v0, ...) are ignored
            Some(_) => {}
            None => return Err(SignatureError::Malformed),
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    Ok((timestamp, candidates))
}
