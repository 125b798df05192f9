use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use std::fmt;
use tracing::info;

use sigil_core::constants::{
    GENESIS_SIGNATURE, GENESIS_SIGNER, KDF_ALGORITHM, NONCE_BYTES, OFF_CHAIN_PREFIX, SALT_BYTES,
};
use sigil_core::error::SigilError;
use sigil_core::types::BlockHash;
use sigil_core::{Block, EncryptionEnvelope};
use sigil_crypto::verify_signature;
use sigil_offchain::OffChainStore;
use sigil_store::LedgerDb;

use crate::auth::KeyRegistry;

// ── Report types ─────────────────────────────────────────────────────────────

/// Why a block failed a check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultReason {
    SequenceGap,
    PreviousHashMismatch,
    HashMismatch,
    BadSignature,
    OffChainIntegrity,
    MalformedEnvelope,
    GenesisMismatch,
    /// Compliance, not structure: the signer was not authorized at the
    /// block's timestamp.
    UnauthorizedAtTimestamp,
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FaultReason::SequenceGap => "block number out of sequence",
            FaultReason::PreviousHashMismatch => "previous-hash link mismatch",
            FaultReason::HashMismatch => "stored hash does not match canonical form",
            FaultReason::BadSignature => "signature verification failed",
            FaultReason::OffChainIntegrity => "off-chain data failed integrity checks",
            FaultReason::MalformedEnvelope => "encryption envelope is malformed",
            FaultReason::GenesisMismatch => "genesis block does not match sentinels",
            FaultReason::UnauthorizedAtTimestamp => "signer not authorized at block timestamp",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockFault {
    pub block_number: u64,
    pub reason: FaultReason,
    pub detail: String,
}

/// The validator's verdict, in two independent dimensions: structure
/// (hashes, links, signatures, off-chain integrity) and authorization
/// compliance (was each signer authorized at its block's timestamp).
#[derive(Clone, Debug)]
pub struct ValidationResult {
    pub is_structurally_intact: bool,
    pub is_fully_compliant: bool,
    pub invalid_blocks: Vec<BlockFault>,
    pub revoked_blocks: Vec<BlockFault>,
    pub report_text: String,
}

// ── Validator ────────────────────────────────────────────────────────────────

/// Walk the whole chain in batches and report. Read-only; block-level
/// findings are collected, never raised as errors.
pub(crate) fn validate_chain(
    db: &LedgerDb,
    offchain: &OffChainStore,
    batch_size: u64,
) -> Result<ValidationResult, SigilError> {
    let registry = KeyRegistry::new(db);
    let total = db.block_count();
    let max = db.max_block_number()?.unwrap_or(0);

    let mut invalid_blocks = Vec::new();
    let mut revoked_blocks = Vec::new();
    // Numbering may legitimately skip values after a rollback (the
    // sequence is never decremented), so links are checked against the
    // actual predecessor, and ordering only has to be strictly ascending
    // from genesis.
    let mut previous: Option<(u64, BlockHash)> = None;

    let mut from = 0u64;
    while from <= max {
        let to = from.saturating_add(batch_size);
        let batch = db.blocks_range(from, to)?;
        if batch.is_empty() && from == 0 && total == 0 {
            break;
        }
        for block in &batch {
            check_block(
                block,
                previous.as_ref(),
                offchain,
                &registry,
                &mut invalid_blocks,
                &mut revoked_blocks,
            )?;
            previous = Some((block.block_number, block.hash));
        }
        if to <= from {
            break;
        }
        from = to;
    }

    let is_structurally_intact = invalid_blocks.is_empty() && total > 0;
    let is_fully_compliant = is_structurally_intact && revoked_blocks.is_empty();
    let report_text = build_report(total, is_structurally_intact, is_fully_compliant, &invalid_blocks, &revoked_blocks);
    info!(
        blocks = total,
        intact = is_structurally_intact,
        compliant = is_fully_compliant,
        "chain validated"
    );

    Ok(ValidationResult {
        is_structurally_intact,
        is_fully_compliant,
        invalid_blocks,
        revoked_blocks,
        report_text,
    })
}

fn check_block(
    block: &Block,
    previous: Option<&(u64, BlockHash)>,
    offchain: &OffChainStore,
    registry: &KeyRegistry<'_>,
    invalid_blocks: &mut Vec<BlockFault>,
    revoked_blocks: &mut Vec<BlockFault>,
) -> Result<(), SigilError> {
    let n = block.block_number;
    let mut fault = |reason: FaultReason, detail: String| {
        invalid_blocks.push(BlockFault {
            block_number: n,
            reason,
            detail,
        });
    };

    match previous {
        None if n != 0 => {
            fault(
                FaultReason::SequenceGap,
                format!("chain starts at block {n}, not genesis"),
            );
        }
        Some((previous_number, _)) if n <= *previous_number => {
            fault(
                FaultReason::SequenceGap,
                format!("block {n} does not ascend past {previous_number}"),
            );
        }
        _ => {}
    }

    if block.is_genesis() {
        if block.previous_hash != BlockHash::zero()
            || block.signer_public_key != GENESIS_SIGNER
            || block.signature != GENESIS_SIGNATURE
            || !block.data.is_empty()
            || block.off_chain_ref.is_some()
            || block.compute_hash() != block.hash
        {
            fault(
                FaultReason::GenesisMismatch,
                "genesis sentinels do not match".into(),
            );
        }
        return Ok(());
    }

    // Structural: link, hash, signature.
    let predecessor_hash = previous.map(|(_, hash)| *hash).unwrap_or_else(BlockHash::zero);
    if block.previous_hash != predecessor_hash {
        fault(
            FaultReason::PreviousHashMismatch,
            format!(
                "stored {}, predecessor hash {}",
                block.previous_hash, predecessor_hash
            ),
        );
    }
    if block.compute_hash() != block.hash {
        fault(FaultReason::HashMismatch, "canonical recompute differs".into());
    }
    if verify_signature(
        &block.signer_public_key,
        block.hash.to_hex().as_bytes(),
        &block.signature,
    )
    .is_err()
    {
        fault(FaultReason::BadSignature, "ECDSA verification failed".into());
    }

    // Structural: off-chain integrity.
    if block.is_off_chain() {
        match &block.off_chain_ref {
            Some(meta) => {
                let expected_ref = format!("{OFF_CHAIN_PREFIX}{}", meta.data_hash.to_hex());
                if block.data != expected_ref {
                    fault(
                        FaultReason::OffChainIntegrity,
                        "reference does not match stored data hash".into(),
                    );
                } else if !offchain.verify(meta, n) {
                    fault(
                        FaultReason::OffChainIntegrity,
                        format!("file {} failed verification", meta.file_path),
                    );
                }
            }
            None => fault(
                FaultReason::OffChainIntegrity,
                "off-chain reference missing".into(),
            ),
        }
    } else if block.off_chain_ref.is_some() {
        fault(
            FaultReason::OffChainIntegrity,
            "dangling off-chain metadata on on-chain block".into(),
        );
    }

    // Structural: the envelope must be well-formed. The validator never
    // decrypts without a password; absence of one does not reduce
    // structural validity.
    if let Some(envelope) = &block.encryption_metadata {
        if let Err(detail) = check_envelope(envelope) {
            fault(FaultReason::MalformedEnvelope, detail);
        }
    }

    // Compliance: authorization at the block's own timestamp.
    if !registry.was_authorized_at(&block.signer_public_key, block.timestamp)? {
        revoked_blocks.push(BlockFault {
            block_number: n,
            reason: FaultReason::UnauthorizedAtTimestamp,
            detail: format!("signer {}…", truncate(&block.signer_public_key)),
        });
    }
    Ok(())
}

fn check_envelope(envelope: &EncryptionEnvelope) -> Result<(), String> {
    if envelope.kdf != KDF_ALGORITHM {
        return Err(format!("unknown kdf {}", envelope.kdf));
    }
    if envelope.iterations == 0 {
        return Err("zero KDF iterations".into());
    }
    match B64.decode(&envelope.salt) {
        Ok(salt) if salt.len() == SALT_BYTES => {}
        _ => return Err("bad salt encoding".into()),
    }
    match B64.decode(&envelope.iv) {
        Ok(iv) if iv.len() == NONCE_BYTES => {}
        _ => return Err("bad IV encoding".into()),
    }
    Ok(())
}

fn build_report(
    total: u64,
    intact: bool,
    compliant: bool,
    invalid_blocks: &[BlockFault],
    revoked_blocks: &[BlockFault],
) -> String {
    let mut lines = vec![format!(
        "Chain validation: {total} blocks, structure {}, compliance {}",
        if intact { "intact" } else { "BROKEN" },
        if compliant { "ok" } else { "DEGRADED" },
    )];
    for fault in invalid_blocks {
        lines.push(format!(
            "  block {}: {} ({})",
            fault.block_number, fault.reason, fault.detail
        ));
    }
    for fault in revoked_blocks {
        lines.push(format!(
            "  block {}: {} ({})",
            fault.block_number, fault.reason, fault.detail
        ));
    }
    lines.join("\n")
}

fn truncate(key: &str) -> String {
    key.chars().take(16).collect()
}
