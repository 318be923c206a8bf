//! Content digests used to name and verify campaign assets.

use sha1::{Digest, Sha1};

/// Lowercase hex SHA-1 of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}
