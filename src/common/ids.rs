//! Identifiers and content checksums for registered artifacts.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fresh identifier for a training run (the unit metrics and files attach to).
pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lowercase hex SHA-256 of an artifact blob.
pub fn checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
