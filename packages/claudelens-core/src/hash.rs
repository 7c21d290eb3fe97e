//! Content-hash and checksum primitives.
//!
//! `content_hash` (Invariant I3) uses `blake3` for speed since it runs on
//! every ingested record; the backup/restore checksum (§4.7, §4.8) uses
//! `sha2` since the archive format commits to `checksum_algo: "sha256"`
//! in its header and the two must not be conflated.

use sha2::{Digest, Sha256};

/// Computes the stable content hash of a normalized message payload.
///
/// `normalized` must already have whitespace and key ordering normalized
/// by the caller; this function only hashes the bytes it is given.
#[must_use]
pub fn content_hash(normalized: &[u8]) -> String {
    blake3::hash(normalized).to_hex().to_string()
}

/// Incremental SHA-256 accumulator used while streaming an archive.
///
/// Kept distinct from a one-shot `Sha256::digest` call so the backup
/// engine can compute the checksum inline on each uncompressed chunk as
/// it passes, rather than buffering the whole stream (see the streaming
/// design note in §9).
#[derive(Default)]
pub struct RollingChecksum {
    hasher: Sha256,
}

impl RollingChecksum {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        let a = content_hash(b"hello world");
        let b = content_hash(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_differs_on_different_input() {
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }

    #[test]
    fn rolling_checksum_matches_one_shot_digest() {
        let mut rolling = RollingChecksum::new();
        rolling.update(b"hello ");
        rolling.update(b"world");
        let rolling_hex = rolling.finalize_hex();

        let one_shot = hex::encode(Sha256::digest(b"hello world"));
        assert_eq!(rolling_hex, one_shot);
    }
}
