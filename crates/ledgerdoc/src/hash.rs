//! Content hashing. The SHA-256 hex digest of a file's bytes is the stable
//! document identifier and dedup key across the whole system.

use sha2::{Digest, Sha256};

/// Computes the lowercase SHA-256 hex digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
