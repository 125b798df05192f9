use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use std::collections::BTreeSet;

use sigil_core::constants::{KDF_ALGORITHM, NONCE_BYTES, PBKDF2_ITERATIONS};
use sigil_core::error::SigilError;
use sigil_core::index::{coarse_bucket, IndexEntry, PrivatePayload};
use sigil_core::types::{BlockHash, Timestamp};
use sigil_core::{Block, EncryptionEnvelope, PrivateTermsBlob, SearchMetadata};
use sigil_crypto::{derive_key, open, random_nonce, random_salt, seal};

use crate::extract::{extract_universal_tokens, normalize_term};
use crate::visibility::{TermVisibility, TermVisibilityMap};

/// Maximum characters of payload carried into the private-layer snippet.
const SNIPPET_CHARS: usize = 160;

/// What the index needs to know about a block being appended.
pub struct IndexedBlock<'a> {
    pub block_hash: BlockHash,
    pub block_number: u64,
    pub timestamp: Timestamp,
    /// Payload plaintext, before on-chain encryption or off-chain offload.
    pub plaintext: &'a str,
    pub owner: Option<String>,
}

/// Split the manual terms across the two layers, run automatic extraction
/// into the public layer, and seal the private layer under the block
/// password. Returns the store-side entry and the block-side metadata.
pub fn build_index_entry(
    block: &IndexedBlock<'_>,
    manual_terms: &[String],
    visibility: &TermVisibilityMap,
    category: Option<&str>,
    password: Option<&str>,
) -> Result<(IndexEntry, SearchMetadata), SigilError> {
    let mut public_tokens: BTreeSet<String> = BTreeSet::new();
    let mut private_terms: BTreeSet<String> = BTreeSet::new();

    for term in manual_terms {
        let normalized = normalize_term(term);
        if normalized.is_empty() {
            continue;
        }
        match visibility.visibility_of(&normalized) {
            TermVisibility::Public => {
                public_tokens.insert(normalized);
            }
            TermVisibility::Private => {
                private_terms.insert(normalized);
            }
        }
    }

    // Automatic extraction lands in the public layer unless the caller
    // explicitly marked the exact token private.
    for token in extract_universal_tokens(block.plaintext) {
        match visibility.visibility_of(&token) {
            TermVisibility::Public => {
                public_tokens.insert(token);
            }
            TermVisibility::Private => {
                private_terms.insert(token);
            }
        }
    }

    let private_layer = if private_terms.is_empty() {
        None
    } else {
        let password = password.ok_or_else(|| {
            SigilError::InvalidConfig("private terms require a block password".into())
        })?;
        let payload = PrivatePayload {
            terms: private_terms,
            exact_timestamp: block.timestamp,
            owner: block.owner.clone(),
            snippet: Some(block.plaintext.chars().take(SNIPPET_CHARS).collect()),
        };
        Some(seal_private_layer(&payload, password, &block.block_hash)?)
    };

    let entry = IndexEntry {
        block_hash: block.block_hash,
        block_number: block.block_number,
        category: category.map(str::to_owned),
        bucket_timestamp: coarse_bucket(block.timestamp),
        public_tokens: public_tokens.clone(),
        private_layer: private_layer.clone(),
    };
    let metadata = SearchMetadata {
        category: category.map(str::to_owned),
        public_terms: public_tokens.into_iter().collect(),
        private_terms: private_layer,
    };
    Ok((entry, metadata))
}

fn seal_private_layer(
    payload: &PrivatePayload,
    password: &str,
    block_hash: &BlockHash,
) -> Result<PrivateTermsBlob, SigilError> {
    let plaintext =
        bincode::serialize(payload).map_err(|e| SigilError::Serialization(e.to_string()))?;
    let salt = random_salt();
    let nonce = random_nonce();
    let key = derive_key(password, &salt, PBKDF2_ITERATIONS);
    let ciphertext = seal(&key, &nonce, &plaintext, block_hash.to_hex().as_bytes())?;
    Ok(PrivateTermsBlob {
        salt: B64.encode(salt),
        iv: B64.encode(nonce),
        ciphertext: B64.encode(ciphertext),
    })
}

/// Open a private layer with the block password. A wrong password
/// surfaces as [`SigilError::TagMismatch`]; callers running a search
/// treat that as "zero private matches", not an error.
pub fn decrypt_private_layer(
    blob: &PrivateTermsBlob,
    password: &str,
    block_hash: &BlockHash,
) -> Result<PrivatePayload, SigilError> {
    let salt = B64
        .decode(&blob.salt)
        .map_err(|e| SigilError::InvalidEncoding(format!("private layer salt: {e}")))?;
    let nonce = decode_nonce(&blob.iv)?;
    let ciphertext = B64
        .decode(&blob.ciphertext)
        .map_err(|e| SigilError::InvalidEncoding(format!("private layer ciphertext: {e}")))?;
    let key = derive_key(password, &salt, PBKDF2_ITERATIONS);
    let plaintext = open(&key, &nonce, &ciphertext, block_hash.to_hex().as_bytes())?;
    bincode::deserialize(&plaintext).map_err(|e| SigilError::Serialization(e.to_string()))
}

// ── On-chain payload encryption ──────────────────────────────────────────────

/// Seal a payload for on-chain storage under a caller password. Returns
/// the base64 ciphertext destined for the block's `data` field and the
/// envelope recording the KDF parameters.
pub fn encrypt_block_payload(
    plaintext: &[u8],
    password: &str,
    block_number: u64,
) -> Result<(String, EncryptionEnvelope), SigilError> {
    let salt = random_salt();
    let nonce = random_nonce();
    let key = derive_key(password, &salt, PBKDF2_ITERATIONS);
    let ciphertext = seal(&key, &nonce, plaintext, payload_aad(block_number).as_bytes())?;
    Ok((
        B64.encode(ciphertext),
        EncryptionEnvelope {
            kdf: KDF_ALGORITHM.to_string(),
            iterations: PBKDF2_ITERATIONS,
            salt: B64.encode(salt),
            iv: B64.encode(nonce),
        },
    ))
}

/// Decrypt an on-chain-encrypted block payload using its envelope.
pub fn decrypt_block_payload(block: &Block, password: &str) -> Result<Vec<u8>, SigilError> {
    let envelope = block
        .encryption_metadata
        .as_ref()
        .ok_or_else(|| SigilError::InvalidConfig("block payload is not encrypted".into()))?;
    let salt = B64
        .decode(&envelope.salt)
        .map_err(|e| SigilError::InvalidEncoding(format!("envelope salt: {e}")))?;
    let nonce = decode_nonce(&envelope.iv)?;
    let ciphertext = B64
        .decode(&block.data)
        .map_err(|e| SigilError::InvalidEncoding(format!("encrypted payload: {e}")))?;
    let key = derive_key(password, &salt, envelope.iterations);
    open(
        &key,
        &nonce,
        &ciphertext,
        payload_aad(block.block_number).as_bytes(),
    )
}

fn payload_aad(block_number: u64) -> String {
    format!("block-{block_number}")
}

fn decode_nonce(iv_b64: &str) -> Result<[u8; NONCE_BYTES], SigilError> {
    let bytes = B64
        .decode(iv_b64)
        .map_err(|e| SigilError::InvalidEncoding(format!("nonce: {e}")))?;
    if bytes.len() != NONCE_BYTES {
        return Err(SigilError::InvalidEncoding("nonce length".into()));
    }
    let mut arr = [0u8; NONCE_BYTES];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(plaintext: &str) -> IndexedBlock<'_> {
        IndexedBlock {
            block_hash: BlockHash::from_bytes([9u8; 32]),
            block_number: 4,
            timestamp: 1_700_000_000_000_000_000,
            plaintext,
            owner: Some("alice".into()),
        }
    }

    #[test]
    fn terms_split_by_visibility() {
        let block = sample_block("routine checkup");
        let visibility = TermVisibilityMap::default()
            .set("john", TermVisibility::Private)
            .set("diabetes", TermVisibility::Private);
        let terms = vec!["patient".into(), "john".into(), "diabetes".into()];

        let (entry, metadata) =
            build_index_entry(&block, &terms, &visibility, Some("MEDICAL"), Some("pw123456"))
                .unwrap();

        assert!(entry.public_tokens.contains("patient"));
        assert!(!entry.public_tokens.contains("john"));
        assert!(!entry.public_tokens.contains("diabetes"));
        assert_eq!(entry.category.as_deref(), Some("MEDICAL"));

        let payload = decrypt_private_layer(
            entry.private_layer.as_ref().unwrap(),
            "pw123456",
            &block.block_hash,
        )
        .unwrap();
        assert!(payload.terms.contains("john"));
        assert!(payload.terms.contains("diabetes"));
        assert_eq!(payload.exact_timestamp, block.timestamp);
        assert_eq!(metadata.private_terms, entry.private_layer);
    }

    #[test]
    fn auto_extraction_feeds_public_layer() {
        let block = sample_block("invoice INV-2024 for 1500 EUR");
        let (entry, _) =
            build_index_entry(&block, &[], &TermVisibilityMap::default(), None, None).unwrap();
        assert!(entry.public_tokens.contains("inv-2024"));
        assert!(entry.public_tokens.contains("1500"));
        assert!(entry.public_tokens.contains("eur"));
        assert!(entry.private_layer.is_none());
    }

    #[test]
    fn private_terms_without_password_rejected() {
        let block = sample_block("x");
        let visibility = TermVisibilityMap::all_private();
        let err = build_index_entry(&block, &["secret".into()], &visibility, None, None)
            .unwrap_err();
        assert_eq!(err.kind(), sigil_core::ErrorKind::InvalidInput);
    }

    #[test]
    fn wrong_password_is_tag_mismatch() {
        let block = sample_block("x");
        let visibility = TermVisibilityMap::all_private();
        let (entry, _) = build_index_entry(
            &block,
            &["secret".into()],
            &visibility,
            None,
            Some("right1pw"),
        )
        .unwrap();
        let err = decrypt_private_layer(
            entry.private_layer.as_ref().unwrap(),
            "wrong1pw",
            &block.block_hash,
        )
        .unwrap_err();
        assert!(matches!(err, SigilError::TagMismatch));
    }

    #[test]
    fn payload_encryption_round_trip() {
        let (ciphertext_b64, envelope) =
            encrypt_block_payload(b"classified entry", "pw123456", 11).unwrap();
        let mut block = Block::genesis(0);
        block.block_number = 11;
        block.data = ciphertext_b64;
        block.encryption_metadata = Some(envelope);

        assert_eq!(
            decrypt_block_payload(&block, "pw123456").unwrap(),
            b"classified entry"
        );
        assert!(decrypt_block_payload(&block, "wrong9pw").is_err());
    }
}
