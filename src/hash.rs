//! Content hashing
//!
//! All content hashes in the node are SHA-256 over the canonical JSON form
//! of a value. serde_json keeps object keys in sorted order, so serializing
//! a `Value` yields the canonical byte stream directly. A JSON `null`
//! contributes no bytes anywhere a hash is computed.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{NodeError, Result};

/// SHA-256 of raw bytes, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical JSON serialization of a value, lowercase hex.
pub fn json_hash(value: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(value)?;
    Ok(sha256_hex(&canonical))
}

/// Content hash in wire form: `0x` + hex(SHA-256(canonical-JSON(value))).
pub fn content_hash(value: &Value) -> Result<String> {
    Ok(format!("0x{}", json_hash(value)?))
}

/// Compare two content hashes, tolerating an optional `0x` prefix and
/// mixed case on either side.
pub fn hashes_equal(a: &str, b: &str) -> bool {
    let strip = |h: &str| {
        h.strip_prefix("0x")
            .unwrap_or(h)
            .to_ascii_lowercase()
    };
    !a.is_empty() && !b.is_empty() && strip(a) == strip(b)
}

/// Seal hash for a data item, following the value/blob rules:
///
/// - value only: hash of the canonical value JSON
/// - blob only: the blob hash itself
/// - both: SHA-256 over the two hex digests concatenated
/// - neither: error (nothing to commit to)
pub fn seal_hash(value: Option<&Value>, blob_hash: Option<&str>) -> Result<String> {
    // A present-but-null value is the same as no value at all.
    let value = value.filter(|v| !v.is_null());
    let blob_hash = blob_hash.filter(|h| !h.is_empty());

    match (value, blob_hash) {
        (Some(v), None) => json_hash(v),
        (None, Some(b)) => Ok(b.to_string()),
        (Some(v), Some(b)) => {
            let value_hash = json_hash(v)?;
            Ok(sha256_hex(format!("{value_hash}{b}").as_bytes()))
        }
        (None, None) => Err(NodeError::Validation(
            "data item has neither value nor blob to hash".to_string(),
        )),
    }
}
