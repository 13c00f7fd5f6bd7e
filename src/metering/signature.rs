use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Canonical signing payload of a usage report. This is the wire contract
/// shared with the usage oracle:
///
/// `"{listing_id}|{buyer_wallet}|{calls_reported}|{idempotency_key}"`
///
/// with calls in plain decimal, MACed with HMAC-SHA256 and hex-encoded
/// lowercase.
pub fn canonical_payload(
    listing_id: &str,
    buyer_wallet: &str,
    calls_reported: i64,
    idempotency_key: &str,
) -> String {
    format!(
        "{}|{}|{}|{}",
        listing_id, buyer_wallet, calls_reported, idempotency_key
    )
}

/// Compute the signature the oracle attaches to a report.
pub fn sign_report(
    secret: &str,
    listing_id: &str,
    buyer_wallet: &str,
    calls_reported: i64,
    idempotency_key: &str,
) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(canonical_payload(listing_id, buyer_wallet, calls_reported, idempotency_key).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a report signature using constant-time comparison.
pub fn verify_report(
    secret: &str,
    listing_id: &str,
    buyer_wallet: &str,
    calls_reported: i64,
    idempotency_key: &str,
    signature: &str,
) -> AppResult<bool> {
    let expected = sign_report(secret, listing_id, buyer_wallet, calls_reported, idempotency_key)?;

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();
    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
