//! sigil-engine
//!
//! The ledger engine: genesis bootstrap, the append pipeline, the
//! authorized-key lifecycle, the chain validator, and the mutators
//! (rollback, export/import, clear). All public operations coordinate
//! through one engine-wide readers–writer lock — mutators take the
//! exclusive side, reads and validation the shared side.

pub mod append;
pub mod auth;
pub mod config;
pub mod export;
pub mod mutate;
pub mod validate;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use sigil_core::error::SigilError;
use sigil_core::keys::{AddKeyOutcome, AuthorizedKey, DeletionImpact, RevokeOutcome};
use sigil_core::types::{BlockHash, Timestamp};
use sigil_core::Block;
use sigil_crypto::keypair::KeyPair;
use sigil_index::{SearchEngine, SearchOptions, SearchResult};
use sigil_offchain::OffChainStore;
use sigil_store::LedgerDb;

pub use append::AppendOptions;
pub use config::LedgerConfig;
pub use export::ChainExport;
pub use validate::{BlockFault, FaultReason, ValidationResult};

use auth::KeyRegistry;

/// A private, permissioned, append-only ledger.
///
/// Callers own one `LedgerEngine` per data directory and share it behind
/// an `Arc`; every operation takes `&self`.
pub struct LedgerEngine {
    db: Arc<LedgerDb>,
    offchain: OffChainStore,
    config: LedgerConfig,
    lock: RwLock<()>,
}

impl LedgerEngine {
    /// Open (or create) the ledger at the configured directories. An
    /// empty store is bootstrapped with the genesis block.
    pub fn open(config: LedgerConfig) -> Result<Self, SigilError> {
        config.validate()?;
        let db = Arc::new(LedgerDb::open(&config.data_dir)?);
        let offchain =
            OffChainStore::open(&config.off_chain_dir)?.with_chunk_size(config.chunk_bytes);
        if db.block_count() == 0 {
            mutate::bootstrap_genesis(&db)?;
        }
        Ok(Self {
            db,
            offchain,
            config,
            lock: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ── Append ───────────────────────────────────────────────────────────────

    /// Append a new block. Validates, routes on/off-chain, hashes, signs,
    /// and persists block plus index entry as one totally ordered write.
    pub fn append(
        &self,
        data: &str,
        signer: &KeyPair,
        options: AppendOptions,
    ) -> Result<Block, SigilError> {
        let _guard = self.lock.write();
        append::run_append(&self.db, &self.offchain, &self.config, data, signer, &options)
    }

    /// Like [`LedgerEngine::append`], but gives up with
    /// [`SigilError::LockDeadline`] if the exclusive lock cannot be
    /// acquired within `deadline`.
    pub fn append_with_deadline(
        &self,
        data: &str,
        signer: &KeyPair,
        options: AppendOptions,
        deadline: Duration,
    ) -> Result<Block, SigilError> {
        let Some(_guard) = self.lock.try_write_for(deadline) else {
            return Err(SigilError::LockDeadline);
        };
        append::run_append(&self.db, &self.offchain, &self.config, data, signer, &options)
    }

    // ── Authorized keys ──────────────────────────────────────────────────────

    pub fn add_authorized_key(
        &self,
        public_key: &str,
        owner_name: &str,
        timestamp: Option<Timestamp>,
    ) -> Result<AddKeyOutcome, SigilError> {
        let _guard = self.lock.write();
        KeyRegistry::new(&self.db).add(public_key, owner_name, timestamp)
    }

    pub fn revoke_authorized_key(&self, public_key: &str) -> Result<RevokeOutcome, SigilError> {
        let _guard = self.lock.write();
        KeyRegistry::new(&self.db).revoke(public_key)
    }

    pub fn is_key_active_now(&self, public_key: &str) -> Result<bool, SigilError> {
        let _guard = self.lock.read();
        KeyRegistry::new(&self.db).is_active_now(public_key)
    }

    pub fn was_key_authorized_at(
        &self,
        public_key: &str,
        t: Timestamp,
    ) -> Result<bool, SigilError> {
        let _guard = self.lock.read();
        KeyRegistry::new(&self.db).was_authorized_at(public_key, t)
    }

    pub fn list_active_keys(&self) -> Result<Vec<AuthorizedKey>, SigilError> {
        let _guard = self.lock.read();
        KeyRegistry::new(&self.db).list_active()
    }

    pub fn list_all_keys(&self) -> Result<Vec<AuthorizedKey>, SigilError> {
        let _guard = self.lock.read();
        KeyRegistry::new(&self.db).list_all()
    }

    pub fn get_key_history(&self, public_key: &str) -> Result<Vec<AuthorizedKey>, SigilError> {
        let _guard = self.lock.read();
        KeyRegistry::new(&self.db).get_key_history(public_key)
    }

    pub fn analyze_deletion_impact(&self, public_key: &str) -> Result<DeletionImpact, SigilError> {
        let _guard = self.lock.read();
        KeyRegistry::new(&self.db).analyze_deletion_impact(public_key)
    }

    /// Hard-delete a key's whole history; refused while blocks signed by
    /// it exist.
    pub fn delete_key_safely(&self, public_key: &str) -> Result<u64, SigilError> {
        let _guard = self.lock.write();
        KeyRegistry::new(&self.db).delete_safely(public_key)
    }

    /// Hard-delete regardless when `force` is set; historical blocks
    /// signed by the key become non-compliant.
    pub fn delete_key_forced(
        &self,
        public_key: &str,
        reason: &str,
        force: bool,
    ) -> Result<u64, SigilError> {
        let _guard = self.lock.write();
        KeyRegistry::new(&self.db).delete_forced(public_key, reason, force)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get_block(&self, number: u64) -> Result<Option<Block>, SigilError> {
        let _guard = self.lock.read();
        self.db.get_block(number)
    }

    pub fn get_block_by_hash(&self, hash: &BlockHash) -> Result<Option<Block>, SigilError> {
        let _guard = self.lock.read();
        self.db.get_block_by_hash(hash)
    }

    pub fn get_last_block(&self) -> Result<Option<Block>, SigilError> {
        let _guard = self.lock.read();
        self.db.last_block()
    }

    pub fn block_count(&self) -> u64 {
        let _guard = self.lock.read();
        self.db.block_count()
    }

    /// Blocks numbered `[from, to)`, ascending.
    pub fn get_blocks_range(&self, from: u64, to: u64) -> Result<Vec<Block>, SigilError> {
        let _guard = self.lock.read();
        self.db.blocks_range(from, to)
    }

    /// Blocks whose timestamps fall in `[from, to]`.
    pub fn get_blocks_by_time_range(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Block>, SigilError> {
        let _guard = self.lock.read();
        Ok(self
            .db
            .iter_all_blocks()?
            .into_iter()
            .filter(|b| b.timestamp >= from && b.timestamp <= to)
            .collect())
    }

    /// Decrypt an on-chain-encrypted block payload with its password.
    pub fn decrypt_block_payload(
        &self,
        number: u64,
        password: &str,
    ) -> Result<Vec<u8>, SigilError> {
        let _guard = self.lock.read();
        let block = self
            .db
            .get_block(number)?
            .ok_or(SigilError::BlockNotFound(number))?;
        sigil_index::decrypt_block_payload(&block, password)
    }

    /// Stream-verify and return an off-chain block's plaintext.
    pub fn get_off_chain_payload(&self, number: u64) -> Result<Vec<u8>, SigilError> {
        let _guard = self.lock.read();
        let block = self
            .db
            .get_block(number)?
            .ok_or(SigilError::BlockNotFound(number))?;
        let meta = block.off_chain_ref.as_ref().ok_or_else(|| {
            SigilError::InvalidConfig(format!("block {number} has no off-chain payload"))
        })?;
        self.offchain.retrieve(meta, number)
    }

    // ── Validation ───────────────────────────────────────────────────────────

    /// Walk the whole chain and report structural integrity and
    /// authorization compliance.
    pub fn validate_chain(&self) -> Result<ValidationResult, SigilError> {
        let _guard = self.lock.read();
        validate::validate_chain(&self.db, &self.offchain, self.config.validation_batch_size)
    }

    // ── Search ───────────────────────────────────────────────────────────────

    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SigilError> {
        let _guard = self.lock.read();
        SearchEngine::new(&self.db, &self.offchain).search(query, options)
    }

    pub fn search_by_category(&self, category: &str) -> Result<Vec<SearchResult>, SigilError> {
        let _guard = self.lock.read();
        SearchEngine::new(&self.db, &self.offchain).search_by_category(category)
    }

    pub fn search_by_date_range(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<SearchResult>, SigilError> {
        let _guard = self.lock.read();
        SearchEngine::new(&self.db, &self.offchain).search_by_date_range(from, to)
    }

    // ── Export / import ──────────────────────────────────────────────────────

    /// Plain export. Refused when the chain carries encrypted payloads or
    /// private index layers — those need [`LedgerEngine::export_chain_encrypted`].
    pub fn export_chain<P: AsRef<Path>>(&self, path: P) -> Result<u64, SigilError> {
        let _guard = self.lock.read();
        export::export_chain(&self.db, &self.offchain, path.as_ref(), None)
    }

    /// Encrypted export: adds the per-block encryption bundle, sealed
    /// under `password`.
    pub fn export_chain_encrypted<P: AsRef<Path>>(
        &self,
        path: P,
        password: &str,
    ) -> Result<u64, SigilError> {
        append::validate_password(password)?;
        let _guard = self.lock.read();
        export::export_chain(&self.db, &self.offchain, path.as_ref(), Some(password))
    }

    /// Plain import. Rejects exports marked `has_encrypted_data`.
    pub fn import_chain<P: AsRef<Path>>(&self, path: P) -> Result<u64, SigilError> {
        let _guard = self.lock.write();
        export::import_chain(
            &self.db,
            &self.offchain,
            path.as_ref(),
            None,
            false,
            self.config.validation_batch_size,
        )
    }

    /// Encrypted import; `password` must unwrap the export's bundle.
    pub fn import_chain_encrypted<P: AsRef<Path>>(
        &self,
        path: P,
        password: &str,
    ) -> Result<u64, SigilError> {
        let _guard = self.lock.write();
        export::import_chain(
            &self.db,
            &self.offchain,
            path.as_ref(),
            Some(password),
            true,
            self.config.validation_batch_size,
        )
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Remove the last `n` blocks (never genesis). Returns the count removed.
    pub fn rollback_blocks(&self, n: u64) -> Result<u64, SigilError> {
        let _guard = self.lock.write();
        mutate::rollback_blocks(&self.db, &self.offchain, n)
    }

    /// Remove every block numbered above `m`.
    pub fn rollback_to_block(&self, m: u64) -> Result<u64, SigilError> {
        let _guard = self.lock.write();
        mutate::rollback_to_block(&self.db, &self.offchain, m)
    }

    /// Destructive reset: wipe everything and re-create genesis.
    pub fn clear_and_reinitialize(&self) -> Result<Block, SigilError> {
        let _guard = self.lock.write();
        mutate::clear_and_reinitialize(&self.db, &self.offchain)
    }

    /// Flush pending database writes to disk.
    pub fn flush(&self) -> Result<(), SigilError> {
        self.db.flush()
    }
}
