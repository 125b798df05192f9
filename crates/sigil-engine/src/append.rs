use tracing::info;

use sigil_core::constants::{MAX_OFF_CHAIN_BYTES, MIN_PASSWORD_CHARS, OFF_CHAIN_PREFIX};
use sigil_core::error::SigilError;
use sigil_core::types::{now, BlockHash};
use sigil_core::Block;
use sigil_crypto::keypair::KeyPair;
use sigil_crypto::verify_signature;
use sigil_index::{build_index_entry, encrypt_block_payload, IndexedBlock, TermVisibilityMap};
use sigil_offchain::OffChainStore;
use sigil_store::LedgerDb;

use crate::auth::KeyRegistry;
use crate::config::LedgerConfig;

// ── Options ──────────────────────────────────────────────────────────────────

/// Caller-supplied knobs for one append.
#[derive(Default)]
pub struct AppendOptions {
    /// Search terms attached by hand, split across the index layers by
    /// `term_visibility`.
    pub manual_terms: Vec<String>,
    pub term_visibility: TermVisibilityMap,
    pub category: Option<String>,
    /// Enables on-chain payload encryption and seals the private index
    /// layer. Validated for strength.
    pub password: Option<String>,
    /// Route off-chain regardless of the size threshold.
    pub force_off_chain: bool,
    /// Content type for off-chain payloads; sniffed when absent.
    pub content_type: Option<String>,
    /// Owner identifier sealed into the private index layer.
    pub owner: Option<String>,
}

/// Where a payload ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StorageDecision {
    OnChain,
    OnChainEncrypted,
    OffChain,
}

fn decide_storage(
    byte_len: u64,
    char_len: usize,
    force_off_chain: bool,
    has_password: bool,
    config: &LedgerConfig,
) -> Result<StorageDecision, SigilError> {
    let in_off_chain_range = byte_len <= MAX_OFF_CHAIN_BYTES;
    if force_off_chain || (byte_len >= config.off_chain_threshold_bytes && in_off_chain_range) {
        if !in_off_chain_range {
            return Err(SigilError::PayloadTooLarge {
                got: byte_len,
                max: MAX_OFF_CHAIN_BYTES,
            });
        }
        return Ok(StorageDecision::OffChain);
    }
    if byte_len > config.max_on_chain_bytes {
        return Err(SigilError::PayloadTooLarge {
            got: byte_len,
            max: MAX_OFF_CHAIN_BYTES,
        });
    }
    if char_len > config.max_on_chain_chars {
        return Err(SigilError::PayloadTooManyChars {
            got: char_len,
            max: config.max_on_chain_chars,
        });
    }
    Ok(if has_password {
        StorageDecision::OnChainEncrypted
    } else {
        StorageDecision::OnChain
    })
}

/// At least eight characters, with a letter and a digit.
pub(crate) fn validate_password(password: &str) -> Result<(), SigilError> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_CHARS;
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if long_enough && has_letter && has_digit {
        Ok(())
    } else {
        Err(SigilError::WeakPassword {
            min: MIN_PASSWORD_CHARS,
        })
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// The append pipeline. Runs entirely under the engine's exclusive write
/// lock; any failure rolls back whatever was already staged (off-chain
/// file, index claim, rows).
pub(crate) fn run_append(
    db: &LedgerDb,
    offchain: &OffChainStore,
    config: &LedgerConfig,
    data: &str,
    signer: &KeyPair,
    options: &AppendOptions,
) -> Result<Block, SigilError> {
    // 1. Preconditions.
    if let Some(password) = &options.password {
        validate_password(password)?;
    }
    if !KeyRegistry::new(db).is_active_now(&signer.public_key)? {
        return Err(SigilError::UnauthorizedSigner(
            signer.public_key.chars().take(24).collect(),
        ));
    }

    // 2. Storage routing.
    let byte_len = data.len() as u64;
    let char_len = data.chars().count();
    let decision = decide_storage(
        byte_len,
        char_len,
        options.force_off_chain,
        options.password.is_some(),
        config,
    )?;

    // 3. Block number first: the off-chain file key derives from it.
    let block_number = db.next_block_number()?;
    let timestamp = now();

    // 4. Off-chain / on-chain-encryption branches.
    let mut off_chain_ref = None;
    let mut encryption_metadata = None;
    let stored_data = match decision {
        StorageDecision::OffChain => {
            let meta = offchain.store_bytes(
                data.as_bytes(),
                signer,
                block_number,
                options.content_type.as_deref(),
            )?;
            let field = format!("{OFF_CHAIN_PREFIX}{}", meta.data_hash.to_hex());
            off_chain_ref = Some(meta);
            field
        }
        StorageDecision::OnChainEncrypted => {
            let Some(password) = options.password.as_deref() else {
                return Err(SigilError::InvalidConfig(
                    "encrypted storage requires a password".into(),
                ));
            };
            let (ciphertext, envelope) =
                encrypt_block_payload(data.as_bytes(), password, block_number)?;
            encryption_metadata = Some(envelope);
            ciphertext
        }
        StorageDecision::OnChain => data.to_string(),
    };

    // Everything past this point must delete the off-chain file on failure.
    let compensate_file = |err: SigilError| -> SigilError {
        if let Some(meta) = &off_chain_ref {
            let _ = offchain.delete(meta);
        }
        err
    };

    // 5. Link, hash, sign.
    let previous_hash = match db.last_block() {
        Ok(Some(last)) => last.hash,
        Ok(None) => BlockHash::zero(),
        Err(e) => return Err(compensate_file(e)),
    };
    let canonical = Block::canonical_bytes(
        block_number,
        &previous_hash,
        timestamp,
        &stored_data,
        &signer.public_key,
    );
    let hash = sigil_crypto::sha3_hash(&canonical);
    let signature = match signer.sign(hash.to_hex().as_bytes()) {
        Ok(sig) => sig,
        Err(e) => return Err(compensate_file(e)),
    };

    // 6. Search metadata, built from the original plaintext.
    let indexed = IndexedBlock {
        block_hash: hash,
        block_number,
        timestamp,
        plaintext: data,
        owner: options.owner.clone(),
    };
    let (entry, search_metadata) = match build_index_entry(
        &indexed,
        &options.manual_terms,
        &options.term_visibility,
        options.category.as_deref(),
        options.password.as_deref(),
    ) {
        Ok(built) => built,
        Err(e) => return Err(compensate_file(e)),
    };

    let block = Block {
        block_number,
        previous_hash,
        timestamp,
        data: stored_data,
        hash,
        signature,
        signer_public_key: signer.public_key.clone(),
        off_chain_ref: off_chain_ref.clone(),
        encryption_metadata,
        search_metadata: Some(search_metadata),
    };

    // 7. Self-check before anything is persisted.
    if block.compute_hash() != block.hash {
        return Err(compensate_file(SigilError::HashMismatch { block_number }));
    }
    if verify_signature(
        &block.signer_public_key,
        block.hash.to_hex().as_bytes(),
        &block.signature,
    )
    .is_err()
    {
        return Err(compensate_file(SigilError::SignatureMismatch {
            block_number,
        }));
    }

    // 8. Reserve the indexing claim, then persist block + index together.
    match db.try_claim_index(&hash) {
        Ok(true) => {}
        Ok(false) => {
            return Err(compensate_file(SigilError::IndexClaimHeld(hash.to_hex())));
        }
        Err(e) => return Err(compensate_file(e)),
    }

    let persisted = db
        .put_block(&block)
        .and_then(|()| db.put_index_entry(&entry))
        .and_then(|()| db.flush());
    match persisted {
        Ok(()) => {
            // Claim is only an in-flight guard; clean it on success too.
            let _ = db.release_index_claim(&hash);
            info!(
                block_number,
                off_chain = block.off_chain_ref.is_some(),
                encrypted = block.encryption_metadata.is_some(),
                "block appended"
            );
            Ok(block)
        }
        Err(e) => {
            let _ = db.delete_index_entry(&hash);
            let _ = db.delete_block(block_number, &hash);
            let _ = db.release_index_claim(&hash);
            Err(compensate_file(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LedgerConfig {
        LedgerConfig::new("/tmp/unused")
            .with_off_chain_threshold(1024)
            .with_max_on_chain_bytes(4096)
    }

    #[test]
    fn threshold_boundary_routes_off_chain() {
        let config = test_config();
        assert_eq!(
            decide_storage(1024, 1024, false, false, &config).unwrap(),
            StorageDecision::OffChain
        );
        assert_eq!(
            decide_storage(1023, 1023, false, false, &config).unwrap(),
            StorageDecision::OnChain
        );
    }

    #[test]
    fn force_off_chain_bypasses_threshold() {
        let config = test_config();
        assert_eq!(
            decide_storage(10, 10, true, false, &config).unwrap(),
            StorageDecision::OffChain
        );
    }

    #[test]
    fn oversized_payload_rejected() {
        let config = test_config();
        let err = decide_storage(MAX_OFF_CHAIN_BYTES + 1, 0, false, false, &config).unwrap_err();
        assert!(matches!(err, SigilError::PayloadTooLarge { .. }));
        let err = decide_storage(MAX_OFF_CHAIN_BYTES + 1, 0, true, false, &config).unwrap_err();
        assert!(matches!(err, SigilError::PayloadTooLarge { .. }));
    }

    #[test]
    fn password_selects_encrypted_on_chain() {
        let config = test_config();
        assert_eq!(
            decide_storage(10, 10, false, true, &config).unwrap(),
            StorageDecision::OnChainEncrypted
        );
    }

    #[test]
    fn char_limit_applies_on_chain_only() {
        let config = test_config().with_max_on_chain_chars(5);
        assert!(matches!(
            decide_storage(10, 10, false, false, &config),
            Err(SigilError::PayloadTooManyChars { .. })
        ));
        // Off-chain payloads are not bounded by the character limit.
        assert_eq!(
            decide_storage(2048, 2048, false, false, &config).unwrap(),
            StorageDecision::OffChain
        );
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("abcd1234").is_ok());
        assert!(validate_password("short1a").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("12345678").is_err());
    }
}
