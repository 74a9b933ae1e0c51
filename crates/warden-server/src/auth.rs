//! HMAC request-signing and API-key verification.
//!
//! Clients are other services, authenticated as services — there is no
//! end-user login, JWT, or password hashing here (spec.md §1 Non-goals).

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// `hex(sha256(body))`, the last term of the HMAC signature input
/// (spec.md §4.5).
pub fn hash_body(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Builds the signature input string: `method + path(?query) + timestamp
/// + hex(sha256(body))` (spec.md §4.5).
pub fn signature_input(method: &str, path_and_query: &str, timestamp: i64, body_hash: &str) -> String {
    format!("{method}{path_and_query}{timestamp}{body_hash}")
}

/// HMAC-SHA256 over `signature_input`, hex-encoded.
pub fn compute_signature(secret: &str, signature_input: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any size for SHA256");
    mac.update(signature_input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies an HMAC request (spec.md §4.5, §8 invariant 6): acceptance
/// iff `|now - timestamp| <= tolerance` *and* the signature matches.
/// `now` is taken explicitly so this is deterministically testable.
pub fn verify_hmac(
    secret: &str,
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    body: &[u8],
    provided_signature: &str,
    tolerance_seconds: i64,
    now: i64,
) -> bool {
    if (now - timestamp).abs() > tolerance_seconds {
        return false;
    }
    let body_hash = hash_body(body);
    let input = signature_input(method, path_and_query, timestamp, &body_hash);
    let expected = compute_signature(secret, &input);
    constant_time_eq(expected.as_bytes(), provided_signature.as_bytes())
}

/// Current Unix timestamp in seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs() as i64
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
