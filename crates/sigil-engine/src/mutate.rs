use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use tracing::info;

use sigil_core::error::SigilError;
use sigil_core::index::{coarse_bucket, IndexEntry};
use sigil_core::types::now;
use sigil_core::Block;
use sigil_offchain::OffChainStore;
use sigil_store::LedgerDb;

// ── Genesis ──────────────────────────────────────────────────────────────────

/// Create block 0 in an empty store: sentinel previous hash, sentinel
/// signer and signature, empty payload. The only append that bypasses
/// authorization.
pub(crate) fn bootstrap_genesis(db: &LedgerDb) -> Result<Block, SigilError> {
    let genesis = Block::genesis(now());
    db.put_block(&genesis)?;
    db.put_index_entry(&entry_from_block(&genesis))?;
    db.resync_sequence(1)?;
    db.flush()?;
    info!(hash = %genesis.hash, "genesis block created");
    Ok(genesis)
}

// ── Rollback ─────────────────────────────────────────────────────────────────

/// Remove the last `n` blocks: off-chain file, index entry, then the
/// block row, newest first, followed by an orphan sweep. The sequence
/// counter is never decremented — block numbers are not reused. Refuses
/// to touch genesis.
pub(crate) fn rollback_blocks(
    db: &LedgerDb,
    offchain: &OffChainStore,
    n: u64,
) -> Result<u64, SigilError> {
    if n == 0 {
        return Ok(0);
    }
    let max = db
        .max_block_number()?
        .ok_or(SigilError::GenesisProtected)?;
    let available = max; // blocks 1..=max; genesis stays
    if n > available {
        return Err(SigilError::RollbackTooDeep {
            requested: n,
            available,
        });
    }

    for number in ((max - n + 1)..=max).rev() {
        let block = db
            .get_block(number)?
            .ok_or(SigilError::BlockNotFound(number))?;
        if let Some(meta) = &block.off_chain_ref {
            offchain.delete(meta)?;
        }
        db.delete_index_entry(&block.hash)?;
        db.delete_block(number, &block.hash)?;
        info!(block_number = number, "block rolled back");
    }

    offchain.cleanup_orphans(&live_off_chain_paths(db)?)?;
    db.flush()?;
    Ok(n)
}

/// Remove every block with a number greater than `m`.
pub(crate) fn rollback_to_block(
    db: &LedgerDb,
    offchain: &OffChainStore,
    m: u64,
) -> Result<u64, SigilError> {
    let max = db
        .max_block_number()?
        .ok_or(SigilError::GenesisProtected)?;
    if m > max {
        return Err(SigilError::BlockNotFound(m));
    }
    rollback_blocks(db, offchain, max - m)
}

/// The file paths every live block still references.
pub(crate) fn live_off_chain_paths(db: &LedgerDb) -> Result<HashSet<PathBuf>, SigilError> {
    let mut paths = HashSet::new();
    for block in db.iter_all_blocks()? {
        if let Some(meta) = &block.off_chain_ref {
            paths.insert(PathBuf::from(&meta.file_path));
        }
    }
    Ok(paths)
}

// ── Clear ────────────────────────────────────────────────────────────────────

/// Destructive reset: delete all off-chain files, clear every table, and
/// re-create genesis.
pub(crate) fn clear_and_reinitialize(
    db: &LedgerDb,
    offchain: &OffChainStore,
) -> Result<Block, SigilError> {
    offchain.cleanup_orphans(&HashSet::new())?;
    db.clear_blocks()?;
    db.clear_authorized_keys()?;
    db.clear_index()?;
    db.clear_meta()?;
    info!("ledger cleared");
    bootstrap_genesis(db)
}

// ── Reindex ──────────────────────────────────────────────────────────────────

/// Rebuild the whole search index from block-side metadata. Private
/// layers are carried as-is; they never need the passwords to re-home.
pub(crate) fn reindex_all(db: &LedgerDb) -> Result<u64, SigilError> {
    db.clear_index()?;
    let mut count = 0u64;
    for block in db.iter_all_blocks()? {
        db.put_index_entry(&entry_from_block(&block))?;
        count += 1;
    }
    info!(entries = count, "search index rebuilt");
    Ok(count)
}

fn entry_from_block(block: &Block) -> IndexEntry {
    match &block.search_metadata {
        Some(metadata) => IndexEntry {
            block_hash: block.hash,
            block_number: block.block_number,
            category: metadata.category.clone(),
            bucket_timestamp: coarse_bucket(block.timestamp),
            public_tokens: metadata.public_terms.iter().cloned().collect(),
            private_layer: metadata.private_terms.clone(),
        },
        None => IndexEntry {
            block_hash: block.hash,
            block_number: block.block_number,
            category: None,
            bucket_timestamp: coarse_bucket(block.timestamp),
            public_tokens: BTreeSet::new(),
            private_layer: None,
        },
    }
}
