//! Submitter identifier hashing
//!
//! Raw IP addresses and device fingerprints are never persisted. They are
//! reduced to `sha256(salt ":" value)` hex digests before reaching the store.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of arbitrary bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Salted, hex-encoded hash of a submitter identifier
///
/// Leading/trailing whitespace is ignored and the value is lower-cased so the
/// same address written two ways lands on one quota counter.
pub fn hash_identifier(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(value.trim().to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}
