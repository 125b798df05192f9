use sha3::{Digest, Sha3_256};
use sigil_core::types::BlockHash;

/// Compute SHA3-256 of arbitrary bytes → [`BlockHash`].
pub fn sha3_hash(data: &[u8]) -> BlockHash {
    let digest = Sha3_256::digest(data);
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&digest);
    BlockHash::from_bytes(arr)
}

/// SHA3-256 as a 64-character lowercase hex string.
pub fn sha3_hex(data: &[u8]) -> String {
    sha3_hash(data).to_hex()
}

/// Incremental SHA3-256 for payloads consumed chunk by chunk (off-chain
/// files up to 100 MiB never sit in memory whole).
pub struct StreamingHasher {
    inner: Sha3_256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha3_256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> BlockHash {
        let digest = self.inner.finalize();
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&digest);
        BlockHash::from_bytes(arr)
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_equals_one_shot() {
        let data = b"a private permissioned ledger".repeat(100);
        let mut hasher = StreamingHasher::new();
        for chunk in data.chunks(7) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize(), sha3_hash(&data));
    }

    #[test]
    fn hex_output_is_64_chars() {
        assert_eq!(sha3_hex(b"x").len(), 64);
    }
}
