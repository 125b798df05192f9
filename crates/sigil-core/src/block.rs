use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::constants::{GENESIS_BLOCK_NUMBER, GENESIS_SIGNATURE, GENESIS_SIGNER, OFF_CHAIN_PREFIX};
use crate::types::{BlockHash, Timestamp};

// ── Block ────────────────────────────────────────────────────────────────────

/// One record on the ledger.
///
/// A block exclusively owns its off-chain metadata and search metadata;
/// everything that refers back to a block does so by number or hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Monotonic, gap-free, starting at 0 (genesis). Never reused.
    pub block_number: u64,
    /// Hash of the predecessor's canonical form; all-zero for genesis.
    pub previous_hash: BlockHash,
    pub timestamp: Timestamp,
    /// The payload, or `OFF_CHAIN_REF:<hash>`, or base64 ciphertext when
    /// `encryption_metadata` is present. Empty string is a system block.
    pub data: String,
    /// SHA3-256 over the canonical serialization.
    pub hash: BlockHash,
    /// Base64 DER ECDSA-P256 signature over the hex hash; sentinel for genesis.
    pub signature: String,
    /// Base64 SubjectPublicKeyInfo of the signer; sentinel for genesis.
    pub signer_public_key: String,
    /// Present iff `data` starts with `OFF_CHAIN_REF:`.
    pub off_chain_ref: Option<OffChainData>,
    /// Present iff the payload is encrypted on-chain.
    pub encryption_metadata: Option<EncryptionEnvelope>,
    pub search_metadata: Option<SearchMetadata>,
}

impl Block {
    /// Canonical byte encoding fed to hashing and signing:
    /// `number|previous_hash_hex|timestamp|data|signer_public_key`.
    pub fn canonical_bytes(
        block_number: u64,
        previous_hash: &BlockHash,
        timestamp: Timestamp,
        data: &str,
        signer_public_key: &str,
    ) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}",
            block_number,
            previous_hash.to_hex(),
            timestamp,
            data,
            signer_public_key
        )
        .into_bytes()
    }

    /// SHA3-256 of this block's canonical form (recomputed, not the stored field).
    pub fn compute_hash(&self) -> BlockHash {
        let bytes = Self::canonical_bytes(
            self.block_number,
            &self.previous_hash,
            self.timestamp,
            &self.data,
            &self.signer_public_key,
        );
        let digest = Sha3_256::digest(&bytes);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&digest);
        BlockHash::from_bytes(arr)
    }

    pub fn is_genesis(&self) -> bool {
        self.block_number == GENESIS_BLOCK_NUMBER
    }

    pub fn is_off_chain(&self) -> bool {
        self.data.starts_with(OFF_CHAIN_PREFIX)
    }

    /// Build the genesis block for the given bootstrap instant.
    pub fn genesis(timestamp: Timestamp) -> Self {
        let mut block = Block {
            block_number: GENESIS_BLOCK_NUMBER,
            previous_hash: BlockHash::zero(),
            timestamp,
            data: String::new(),
            hash: BlockHash::zero(),
            signature: GENESIS_SIGNATURE.to_string(),
            signer_public_key: GENESIS_SIGNER.to_string(),
            off_chain_ref: None,
            encryption_metadata: None,
            search_metadata: None,
        };
        block.hash = block.compute_hash();
        block
    }
}

// ── OffChainData ─────────────────────────────────────────────────────────────

/// Metadata for one encrypted off-chain file. The plaintext never resides
/// in the database; the encrypted file never resides in the database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffChainData {
    /// SHA3-256 of the plaintext.
    pub data_hash: BlockHash,
    /// Base64 DER ECDSA signature over the hex `data_hash`.
    pub signature: String,
    pub file_path: String,
    pub file_size: u64,
    /// Base64 of the 96-bit base nonce; per-chunk nonces derive from it.
    pub encryption_iv: String,
    pub created_at: Timestamp,
    pub content_type: String,
    pub signer_public_key: String,
}

// ── EncryptionEnvelope ───────────────────────────────────────────────────────

/// Key-derivation and cipher parameters for an on-chain encrypted payload.
/// Everything a future reader needs to reproduce decryption, except the
/// password itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    /// KDF identifier, e.g. `pbkdf2-hmac-sha3-256`.
    pub kdf: String,
    pub iterations: u32,
    /// Base64, 128-bit random salt.
    pub salt: String,
    /// Base64, 96-bit random nonce.
    pub iv: String,
}

// ── SearchMetadata ───────────────────────────────────────────────────────────

/// Per-block search metadata as stored on the block itself. The queryable
/// index entry (postings, coarse timestamp) lives in the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub category: Option<String>,
    /// Normalized lowercase public terms (manual + auto-extracted).
    pub public_terms: Vec<String>,
    /// AES-GCM blob over the private term set; `None` when no private
    /// terms were supplied (zero-length plaintext case).
    pub private_terms: Option<PrivateTermsBlob>,
}

/// Ciphertext parameters of an encrypted private term set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateTermsBlob {
    /// Base64 PBKDF2 salt for the password-derived key.
    pub salt: String,
    /// Base64 96-bit nonce.
    pub iv: String,
    /// Base64 ciphertext (AEAD tag appended).
    pub ciphertext: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_matches_sentinels() {
        let g = Block::genesis(42);
        assert!(g.is_genesis());
        assert_eq!(g.previous_hash, BlockHash::zero());
        assert_eq!(g.signer_public_key, GENESIS_SIGNER);
        assert_eq!(g.signature, GENESIS_SIGNATURE);
        assert_eq!(g.data, "");
        assert_eq!(g.hash, g.compute_hash());
    }

    #[test]
    fn hash_covers_every_canonical_field() {
        let base = Block::genesis(1);
        let mut tampered = base.clone();
        tampered.data = "x".into();
        assert_ne!(base.compute_hash(), tampered.compute_hash());

        let mut tampered = base.clone();
        tampered.timestamp += 1;
        assert_ne!(base.compute_hash(), tampered.compute_hash());

        let mut tampered = base.clone();
        tampered.signer_public_key = "other".into();
        assert_ne!(base.compute_hash(), tampered.compute_hash());
    }

    #[test]
    fn off_chain_detection() {
        let mut b = Block::genesis(0);
        assert!(!b.is_off_chain());
        b.data = format!("{}{}", OFF_CHAIN_PREFIX, "ab".repeat(32));
        assert!(b.is_off_chain());
    }
}
