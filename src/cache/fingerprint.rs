//! Content hashing for cache keys and tracing fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing, ensuring deterministic
/// output. Returns a 64-character lowercase hexadecimal string.
pub fn compute_hash<T: Serialize>(value: &T) -> String {
    // Serialization of the plain tuples and strings we hash cannot fail.
    let json = serde_json::to_string(value).expect("fingerprint input serializes");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short form of a hash for span names and log lines.
pub fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let a = compute_hash(&("SELECT 1", "postgres"));
        let b = compute_hash(&("SELECT 1", "postgres"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_differs_on_content() {
        let a = compute_hash(&("SELECT 1", "postgres"));
        let b = compute_hash(&("SELECT 2", "postgres"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_prefix() {
        let hash = compute_hash(&"x");
        assert_eq!(short(&hash).len(), 12);
    }
}
