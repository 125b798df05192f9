use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use sigil_core::constants::{
    ENCRYPTION_BUNDLE_VERSION, EXPORT_FORMAT_VERSION, OFF_CHAIN_BACKUP_DIR, PBKDF2_ITERATIONS,
};
use sigil_core::error::SigilError;
use sigil_core::keys::AuthorizedKey;
use sigil_core::types::{
    now, timestamp_from_rfc3339, timestamp_to_rfc3339, BlockHash,
};
use sigil_core::{Block, EncryptionEnvelope, OffChainData, SearchMetadata};
use sigil_crypto::{derive_key, open, random_nonce, random_salt, seal, verify_signature};
use sigil_offchain::{off_chain_password, OffChainStore};
use sigil_store::LedgerDb;

use crate::mutate::reindex_all;
use crate::validate::validate_chain;

// ── Export document ──────────────────────────────────────────────────────────

/// The self-describing export file. Off-chain files travel in a sibling
/// `off-chain-backup/` directory that the block records point into.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChainExport {
    pub version: String,
    pub has_encrypted_data: bool,
    pub export_timestamp: String,
    pub total_blocks: u64,
    pub blocks: Vec<ExportBlock>,
    pub authorized_keys: Vec<ExportKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_data: Option<EncryptionBundle>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportBlock {
    pub block_number: u64,
    pub previous_hash: String,
    pub timestamp: String,
    pub data: String,
    pub hash: String,
    pub signature: String,
    pub signer_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub off_chain_ref: Option<ExportOffChain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_metadata: Option<EncryptionEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_metadata: Option<SearchMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportOffChain {
    pub data_hash: String,
    pub signature: String,
    /// Relative path into the backup directory.
    pub backup_file: String,
    pub file_size: u64,
    pub encryption_iv: String,
    pub created_at: String,
    pub content_type: String,
    pub signer_public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportKey {
    pub public_key: String,
    pub owner_name: String,
    pub is_active: bool,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
}

/// Everything an encrypted import needs to decrypt later, wrapped so the
/// export password proves itself before any state is touched.
#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptionBundle {
    pub version: String,
    pub master_password: WrappedPassword,
    pub off_chain_passwords: BTreeMap<String, String>,
    pub block_encryption_keys: BTreeMap<String, String>,
    pub user_encryption_keys: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WrappedPassword {
    pub salt: String,
    pub iv: String,
    pub ciphertext: String,
}

const MASTER_WRAP_AAD: &[u8] = b"sigil-export-master";

// ── Export ───────────────────────────────────────────────────────────────────

/// Write the full chain and key history to `path`, copying off-chain
/// files into a sibling backup directory. Read-only against the ledger.
pub(crate) fn export_chain(
    db: &LedgerDb,
    offchain: &OffChainStore,
    path: &Path,
    password: Option<&str>,
) -> Result<u64, SigilError> {
    let blocks = db.iter_all_blocks()?;
    let has_encrypted = blocks.iter().any(|b| {
        b.encryption_metadata.is_some()
            || b.search_metadata
                .as_ref()
                .map(|m| m.private_terms.is_some())
                .unwrap_or(false)
    });
    if has_encrypted && password.is_none() {
        return Err(SigilError::InvalidConfig(
            "chain contains encrypted data; use the encrypted export".into(),
        ));
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let backup_dir = parent.join(OFF_CHAIN_BACKUP_DIR);
    fs::create_dir_all(&backup_dir)?;

    let mut export_blocks = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let backup_file = match &block.off_chain_ref {
            Some(meta) => {
                let name = offchain.copy_to_backup(meta, block.block_number, &backup_dir)?;
                Some(format!("{OFF_CHAIN_BACKUP_DIR}/{name}"))
            }
            None => None,
        };
        export_blocks.push(block_to_export(block, backup_file));
    }

    let authorized_keys = db
        .iter_all_keys()?
        .iter()
        .map(key_to_export)
        .collect::<Vec<_>>();

    let encryption_data = match (has_encrypted, password) {
        (true, Some(password)) => Some(build_bundle(&blocks, password)?),
        _ => None,
    };

    let doc = ChainExport {
        version: EXPORT_FORMAT_VERSION.to_string(),
        has_encrypted_data: has_encrypted,
        export_timestamp: timestamp_to_rfc3339(now()),
        total_blocks: blocks.len() as u64,
        blocks: export_blocks,
        authorized_keys,
        encryption_data,
    };

    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &doc)
        .map_err(|e| SigilError::Serialization(e.to_string()))?;
    info!(
        blocks = doc.total_blocks,
        encrypted = doc.has_encrypted_data,
        path = %path.display(),
        "chain exported"
    );
    Ok(doc.total_blocks)
}

// ── Import ───────────────────────────────────────────────────────────────────

/// Replace the whole ledger with the contents of an export. Exclusive
/// operation; on structural failure after the swap, the previous state is
/// restored from an internal snapshot.
pub(crate) fn import_chain(
    db: &LedgerDb,
    offchain: &OffChainStore,
    path: &Path,
    password: Option<&str>,
    accept_encrypted: bool,
    batch_size: u64,
) -> Result<u64, SigilError> {
    let file = File::open(path)?;
    let doc: ChainExport = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| SigilError::MalformedExport(e.to_string()))?;

    if doc.version != EXPORT_FORMAT_VERSION {
        return Err(SigilError::UnsupportedExportVersion(doc.version));
    }
    if doc.has_encrypted_data && !accept_encrypted {
        return Err(SigilError::ImportFlavorMismatch);
    }
    if doc.has_encrypted_data {
        let bundle = doc
            .encryption_data
            .as_ref()
            .ok_or_else(|| SigilError::MalformedExport("encryption bundle missing".into()))?;
        if bundle.version != ENCRYPTION_BUNDLE_VERSION {
            return Err(SigilError::UnsupportedExportVersion(bundle.version.clone()));
        }
        let password = password
            .ok_or_else(|| SigilError::Crypto("encrypted import requires a password".into()))?;
        verify_master_password(&bundle.master_password, password)?;
    }
    if doc.total_blocks != doc.blocks.len() as u64 {
        return Err(SigilError::MalformedExport(
            "total_blocks does not match block list".into(),
        ));
    }

    let mut parsed = doc
        .blocks
        .iter()
        .map(export_to_block)
        .collect::<Result<Vec<_>, _>>()?;
    parsed.sort_by_key(|(block, _)| block.block_number);
    prevalidate(&parsed)?;

    let keys = doc
        .authorized_keys
        .iter()
        .map(export_to_key)
        .collect::<Result<Vec<_>, _>>()?;

    let export_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let snapshot = take_snapshot(db)?;

    let applied = apply_import(db, offchain, &parsed, &keys, &export_dir)
        .and_then(|count| {
            let report = validate_chain(db, offchain, batch_size)?;
            if report.is_structurally_intact {
                Ok(count)
            } else {
                Err(SigilError::OffChainIntegrity(format!(
                    "imported chain failed validation: {}",
                    report.report_text
                )))
            }
        });

    match applied {
        Ok(count) => {
            snapshot.discard();
            db.flush()?;
            info!(blocks = count, "chain imported");
            Ok(count)
        }
        Err(e) => {
            warn!(error = %e, "import failed; restoring previous state");
            restore_snapshot(db, offchain, &snapshot)?;
            snapshot.discard();
            Err(e)
        }
    }
}

fn apply_import(
    db: &LedgerDb,
    offchain: &OffChainStore,
    parsed: &[(Block, Option<String>)],
    keys: &[AuthorizedKey],
    export_dir: &Path,
) -> Result<u64, SigilError> {
    // Out with the old: files first, then every table.
    offchain.cleanup_orphans(&HashSet::new())?;
    db.clear_blocks()?;
    db.clear_authorized_keys()?;
    db.clear_index()?;
    db.clear_meta()?;

    for key in keys {
        db.put_authorized_key(key)?;
    }

    let mut max_number = 0u64;
    for (block, backup_file) in parsed {
        let mut block = block.clone();
        if let Some(meta) = block.off_chain_ref.as_mut() {
            let backup_file = backup_file.as_ref().ok_or_else(|| {
                SigilError::MalformedExport(format!(
                    "block {} lacks a backup file reference",
                    block.block_number
                ))
            })?;
            meta.file_path = offchain.adopt_file(&export_dir.join(backup_file), block.block_number)?;
        }
        max_number = max_number.max(block.block_number);
        db.put_block(&block)?;
    }

    db.resync_sequence(max_number + 1)?;
    reindex_all(db)?;
    db.flush()?;
    Ok(parsed.len() as u64)
}

/// Structural checks run on the parsed document before any live state is
/// touched: ascending numbering from genesis, link and hash integrity,
/// signatures. Numbering gaps are legal (rollback burns numbers); the
/// links still have to chain through the actual predecessors.
fn prevalidate(parsed: &[(Block, Option<String>)]) -> Result<(), SigilError> {
    if parsed.is_empty() {
        return Err(SigilError::MalformedExport("export contains no blocks".into()));
    }
    if parsed[0].0.block_number != 0 {
        return Err(SigilError::MalformedExport(
            "export does not start at genesis".into(),
        ));
    }
    let mut previous: Option<(u64, BlockHash)> = None;
    for (block, _) in parsed {
        let n = block.block_number;
        if let Some((previous_number, _)) = previous {
            if n <= previous_number {
                return Err(SigilError::MalformedExport(format!(
                    "block numbers not ascending at {n}"
                )));
            }
        }
        if block.compute_hash() != block.hash {
            return Err(SigilError::HashMismatch { block_number: n });
        }
        let predecessor_hash = previous.map(|(_, h)| h).unwrap_or_else(BlockHash::zero);
        if block.previous_hash != predecessor_hash {
            return Err(SigilError::LinkMismatch { block_number: n });
        }
        if !block.is_genesis() {
            verify_signature(
                &block.signer_public_key,
                block.hash.to_hex().as_bytes(),
                &block.signature,
            )
            .map_err(|_| SigilError::SignatureMismatch { block_number: n })?;
        }
        previous = Some((n, block.hash));
    }
    Ok(())
}

// ── Safety snapshot ──────────────────────────────────────────────────────────

struct Snapshot {
    blocks: Vec<Block>,
    keys: Vec<AuthorizedKey>,
    dir: PathBuf,
}

impl Snapshot {
    fn discard(&self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn take_snapshot(db: &LedgerDb) -> Result<Snapshot, SigilError> {
    let dir = std::env::temp_dir().join(format!(
        "sigil-import-snapshot-{}-{}",
        std::process::id(),
        now()
    ));
    fs::create_dir_all(&dir)?;
    let blocks = db.iter_all_blocks()?;
    for block in &blocks {
        if let Some(meta) = &block.off_chain_ref {
            fs::copy(&meta.file_path, dir.join(format!("block_{}", block.block_number)))?;
        }
    }
    let keys = db.iter_all_keys()?;
    Ok(Snapshot { blocks, keys, dir })
}

fn restore_snapshot(
    db: &LedgerDb,
    offchain: &OffChainStore,
    snapshot: &Snapshot,
) -> Result<(), SigilError> {
    offchain.cleanup_orphans(&HashSet::new())?;
    db.clear_blocks()?;
    db.clear_authorized_keys()?;
    db.clear_index()?;
    db.clear_meta()?;

    let mut max_number = 0u64;
    for block in &snapshot.blocks {
        let mut block = block.clone();
        if let Some(meta) = block.off_chain_ref.as_mut() {
            let saved = snapshot.dir.join(format!("block_{}", block.block_number));
            meta.file_path = offchain.adopt_file(&saved, block.block_number)?;
        }
        max_number = max_number.max(block.block_number);
        db.put_block(&block)?;
    }
    for key in &snapshot.keys {
        db.put_authorized_key(key)?;
    }
    db.resync_sequence(max_number + 1)?;
    reindex_all(db)?;
    db.flush()?;
    Ok(())
}

// ── Encryption bundle ────────────────────────────────────────────────────────

fn build_bundle(blocks: &[Block], password: &str) -> Result<EncryptionBundle, SigilError> {
    let salt = random_salt();
    let nonce = random_nonce();
    let key = derive_key(password, &salt, PBKDF2_ITERATIONS);
    let ciphertext = seal(&key, &nonce, password.as_bytes(), MASTER_WRAP_AAD)?;

    let mut off_chain_passwords = BTreeMap::new();
    let mut block_encryption_keys = BTreeMap::new();
    for block in blocks {
        if block.off_chain_ref.is_some() {
            off_chain_passwords.insert(
                block.block_number.to_string(),
                off_chain_password(block.block_number, &block.signer_public_key),
            );
        }
        if let Some(envelope) = &block.encryption_metadata {
            block_encryption_keys.insert(
                block.block_number.to_string(),
                format!("{};salt={}", envelope.kdf, envelope.salt),
            );
        }
    }

    Ok(EncryptionBundle {
        version: ENCRYPTION_BUNDLE_VERSION.to_string(),
        master_password: WrappedPassword {
            salt: B64.encode(salt),
            iv: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
        },
        off_chain_passwords,
        block_encryption_keys,
        user_encryption_keys: BTreeMap::new(),
    })
}

/// Unwrap the master password with itself; a wrong password fails the
/// AEAD tag before the importer has touched anything.
fn verify_master_password(wrapped: &WrappedPassword, password: &str) -> Result<(), SigilError> {
    let salt = B64
        .decode(&wrapped.salt)
        .map_err(|e| SigilError::MalformedExport(format!("master salt: {e}")))?;
    let iv = B64
        .decode(&wrapped.iv)
        .map_err(|e| SigilError::MalformedExport(format!("master iv: {e}")))?;
    let ciphertext = B64
        .decode(&wrapped.ciphertext)
        .map_err(|e| SigilError::MalformedExport(format!("master ciphertext: {e}")))?;
    if iv.len() != 12 {
        return Err(SigilError::MalformedExport("master iv length".into()));
    }
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&iv);
    let key = derive_key(password, &salt, PBKDF2_ITERATIONS);
    let recovered = open(&key, &nonce, &ciphertext, MASTER_WRAP_AAD)?;
    if recovered != password.as_bytes() {
        return Err(SigilError::TagMismatch);
    }
    Ok(())
}

// ── Conversions ──────────────────────────────────────────────────────────────

fn block_to_export(block: &Block, backup_file: Option<String>) -> ExportBlock {
    ExportBlock {
        block_number: block.block_number,
        previous_hash: block.previous_hash.to_hex(),
        timestamp: timestamp_to_rfc3339(block.timestamp),
        data: block.data.clone(),
        hash: block.hash.to_hex(),
        signature: block.signature.clone(),
        signer_public_key: block.signer_public_key.clone(),
        off_chain_ref: block.off_chain_ref.as_ref().map(|meta| ExportOffChain {
            data_hash: meta.data_hash.to_hex(),
            signature: meta.signature.clone(),
            backup_file: backup_file.clone().unwrap_or_default(),
            file_size: meta.file_size,
            encryption_iv: meta.encryption_iv.clone(),
            created_at: timestamp_to_rfc3339(meta.created_at),
            content_type: meta.content_type.clone(),
            signer_public_key: meta.signer_public_key.clone(),
        }),
        encryption_metadata: block.encryption_metadata.clone(),
        search_metadata: block.search_metadata.clone(),
    }
}

fn export_to_block(eb: &ExportBlock) -> Result<(Block, Option<String>), SigilError> {
    let malformed = |what: &str| SigilError::MalformedExport(format!("block field {what}"));
    let previous_hash =
        BlockHash::from_hex(&eb.previous_hash).map_err(|_| malformed("previous_hash"))?;
    let hash = BlockHash::from_hex(&eb.hash).map_err(|_| malformed("hash"))?;
    let timestamp = timestamp_from_rfc3339(&eb.timestamp).ok_or_else(|| malformed("timestamp"))?;

    let (off_chain_ref, backup_file) = match &eb.off_chain_ref {
        Some(oc) => {
            let meta = OffChainData {
                data_hash: BlockHash::from_hex(&oc.data_hash).map_err(|_| malformed("data_hash"))?,
                signature: oc.signature.clone(),
                file_path: String::new(), // rewritten when the file is adopted
                file_size: oc.file_size,
                encryption_iv: oc.encryption_iv.clone(),
                created_at: timestamp_from_rfc3339(&oc.created_at)
                    .ok_or_else(|| malformed("off-chain created_at"))?,
                content_type: oc.content_type.clone(),
                signer_public_key: oc.signer_public_key.clone(),
            };
            (Some(meta), Some(oc.backup_file.clone()))
        }
        None => (None, None),
    };

    Ok((
        Block {
            block_number: eb.block_number,
            previous_hash,
            timestamp,
            data: eb.data.clone(),
            hash,
            signature: eb.signature.clone(),
            signer_public_key: eb.signer_public_key.clone(),
            off_chain_ref,
            encryption_metadata: eb.encryption_metadata.clone(),
            search_metadata: eb.search_metadata.clone(),
        },
        backup_file,
    ))
}

fn key_to_export(key: &AuthorizedKey) -> ExportKey {
    ExportKey {
        public_key: key.public_key.clone(),
        owner_name: key.owner_name.clone(),
        is_active: key.is_active,
        created_at: timestamp_to_rfc3339(key.created_at),
        revoked_at: key.revoked_at.map(timestamp_to_rfc3339),
    }
}

fn export_to_key(ek: &ExportKey) -> Result<AuthorizedKey, SigilError> {
    let malformed = |what: &str| SigilError::MalformedExport(format!("key field {what}"));
    Ok(AuthorizedKey {
        public_key: ek.public_key.clone(),
        owner_name: ek.owner_name.clone(),
        is_active: ek.is_active,
        created_at: timestamp_from_rfc3339(&ek.created_at).ok_or_else(|| malformed("created_at"))?,
        revoked_at: match &ek.revoked_at {
            Some(s) => Some(timestamp_from_rfc3339(s).ok_or_else(|| malformed("revoked_at"))?),
            None => None,
        },
    })
}
