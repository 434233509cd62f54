use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a content hash (rendered as 8 hex chars).
const HASH_BYTES: usize = 4;

/// Short content hash of a stringified value: the first four bytes of its
/// SHA-256 digest as upper-case hex. Empty input has no hash.
#[must_use]
pub fn content_hash(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let digest = Sha256::digest(value.as_bytes());
    Some(hex::encode_upper(&digest[..HASH_BYTES]))
}
