use std::path::Path;

use sigil_core::error::SigilError;
use sigil_core::index::IndexEntry;
use sigil_core::keys::AuthorizedKey;
use sigil_core::types::BlockHash;
use sigil_core::Block;
use sigil_crypto::sha3_hash;

/// Persistent ledger database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   blocks          — u64 be bytes           → bincode(Block)
///   block_hashes    — BlockHash bytes        → u64 be bytes
///   authorized_keys — sha3(pubkey) ++ created_at be → bincode(AuthorizedKey)
///   index_entries   — BlockHash bytes        → bincode(IndexEntry)
///   index_terms     — token ++ 0x00 ++ BlockHash → [] (postings set)
///   index_claims    — BlockHash bytes        → [] (put-if-absent set)
///   meta            — utf8 key bytes         → raw bytes
pub struct LedgerDb {
    _db: sled::Db,
    blocks: sled::Tree,
    block_hashes: sled::Tree,
    authorized_keys: sled::Tree,
    index_entries: sled::Tree,
    index_terms: sled::Tree,
    index_claims: sled::Tree,
    pub(crate) meta: sled::Tree,
}

fn storage_err(e: impl std::fmt::Display) -> SigilError {
    SigilError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> SigilError {
    SigilError::Serialization(e.to_string())
}

impl LedgerDb {
    /// Open or create the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SigilError> {
        let db = sled::open(path).map_err(storage_err)?;
        let blocks          = db.open_tree("blocks").map_err(storage_err)?;
        let block_hashes    = db.open_tree("block_hashes").map_err(storage_err)?;
        let authorized_keys = db.open_tree("authorized_keys").map_err(storage_err)?;
        let index_entries   = db.open_tree("index_entries").map_err(storage_err)?;
        let index_terms     = db.open_tree("index_terms").map_err(storage_err)?;
        let index_claims    = db.open_tree("index_claims").map_err(storage_err)?;
        let meta            = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            blocks,
            block_hashes,
            authorized_keys,
            index_entries,
            index_terms,
            index_claims,
            meta,
        })
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    pub fn put_block(&self, block: &Block) -> Result<(), SigilError> {
        let bytes = bincode::serialize(block).map_err(ser_err)?;
        self.blocks
            .insert(block.block_number.to_be_bytes(), bytes)
            .map_err(storage_err)?;
        self.block_hashes
            .insert(block.hash.as_bytes(), &block.block_number.to_be_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_block(&self, number: u64) -> Result<Option<Block>, SigilError> {
        match self.blocks.get(number.to_be_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_hash(&self, hash: &BlockHash) -> Result<Option<Block>, SigilError> {
        match self.block_hashes.get(hash.as_bytes()).map_err(storage_err)? {
            Some(num_bytes) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&num_bytes);
                self.get_block(u64::from_be_bytes(arr))
            }
            None => Ok(None),
        }
    }

    /// The block with the highest number, if any.
    pub fn last_block(&self) -> Result<Option<Block>, SigilError> {
        match self.blocks.last().map_err(storage_err)? {
            Some((_, bytes)) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn max_block_number(&self) -> Result<Option<u64>, SigilError> {
        match self.blocks.last().map_err(storage_err)? {
            Some((key, _)) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&key);
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Blocks with numbers in `[from, to)`, ascending. The bounded window
    /// is what the batched validator and range reads walk.
    pub fn blocks_range(&self, from: u64, to: u64) -> Result<Vec<Block>, SigilError> {
        let mut out = Vec::new();
        for item in self
            .blocks
            .range(from.to_be_bytes()..to.to_be_bytes())
        {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Every block, ascending. Prefer `blocks_range` for long chains.
    pub fn iter_all_blocks(&self) -> Result<Vec<Block>, SigilError> {
        let mut out = Vec::new();
        for item in self.blocks.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    pub fn delete_block(&self, number: u64, hash: &BlockHash) -> Result<(), SigilError> {
        self.blocks
            .remove(number.to_be_bytes())
            .map_err(storage_err)?;
        self.block_hashes
            .remove(hash.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn clear_blocks(&self) -> Result<(), SigilError> {
        self.blocks.clear().map_err(storage_err)?;
        self.block_hashes.clear().map_err(storage_err)?;
        Ok(())
    }

    // ── Authorized keys ──────────────────────────────────────────────────────
    //
    // Row key: sha3(public_key) ++ created_at big-endian. One key's records
    // sort by creation time under a stable 32-byte prefix.

    fn key_prefix(public_key: &str) -> [u8; 32] {
        *sha3_hash(public_key.as_bytes()).as_bytes()
    }

    fn key_row(public_key: &str, created_at: i64) -> Vec<u8> {
        let mut row = Self::key_prefix(public_key).to_vec();
        row.extend_from_slice(&(created_at as u64).to_be_bytes());
        row
    }

    pub fn put_authorized_key(&self, record: &AuthorizedKey) -> Result<(), SigilError> {
        let bytes = bincode::serialize(record).map_err(ser_err)?;
        self.authorized_keys
            .insert(Self::key_row(&record.public_key, record.created_at), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// All records for one public key, ordered by `created_at` ascending.
    pub fn key_records(&self, public_key: &str) -> Result<Vec<AuthorizedKey>, SigilError> {
        let mut out = Vec::new();
        for item in self.authorized_keys.scan_prefix(Self::key_prefix(public_key)) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// The most recent record for one public key.
    pub fn latest_key_record(&self, public_key: &str) -> Result<Option<AuthorizedKey>, SigilError> {
        Ok(self.key_records(public_key)?.into_iter().last())
    }

    pub fn iter_all_keys(&self) -> Result<Vec<AuthorizedKey>, SigilError> {
        let mut out = Vec::new();
        for item in self.authorized_keys.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Hard-delete every record for one key. Returns the number removed.
    pub fn delete_key_records(&self, public_key: &str) -> Result<u64, SigilError> {
        let mut removed = 0u64;
        let rows: Vec<_> = self
            .authorized_keys
            .scan_prefix(Self::key_prefix(public_key))
            .collect();
        for item in rows {
            let (key, _) = item.map_err(storage_err)?;
            self.authorized_keys.remove(key).map_err(storage_err)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn clear_authorized_keys(&self) -> Result<(), SigilError> {
        self.authorized_keys.clear().map_err(storage_err)?;
        Ok(())
    }

    // ── Search index ─────────────────────────────────────────────────────────

    fn posting_key(token: &str, hash: &BlockHash) -> Vec<u8> {
        let mut key = token.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(hash.as_bytes());
        key
    }

    pub fn put_index_entry(&self, entry: &IndexEntry) -> Result<(), SigilError> {
        let bytes = bincode::serialize(entry).map_err(ser_err)?;
        self.index_entries
            .insert(entry.block_hash.as_bytes(), bytes)
            .map_err(storage_err)?;
        for token in &entry.public_tokens {
            self.index_terms
                .insert(Self::posting_key(token, &entry.block_hash), b"".as_ref())
                .map_err(storage_err)?;
        }
        Ok(())
    }

    pub fn get_index_entry(&self, hash: &BlockHash) -> Result<Option<IndexEntry>, SigilError> {
        match self.index_entries.get(hash.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Remove an entry and all of its postings.
    pub fn delete_index_entry(&self, hash: &BlockHash) -> Result<(), SigilError> {
        if let Some(entry) = self.get_index_entry(hash)? {
            for token in &entry.public_tokens {
                self.index_terms
                    .remove(Self::posting_key(token, hash))
                    .map_err(storage_err)?;
            }
        }
        self.index_entries
            .remove(hash.as_bytes())
            .map_err(storage_err)?;
        self.index_claims
            .remove(hash.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_index_entries(&self) -> Result<Vec<IndexEntry>, SigilError> {
        let mut out = Vec::new();
        for item in self.index_entries.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Block hashes whose public layer contains `token` (exact match).
    pub fn blocks_with_token(&self, token: &str) -> Result<Vec<BlockHash>, SigilError> {
        let mut prefix = token.as_bytes().to_vec();
        prefix.push(0);
        let mut out = Vec::new();
        for item in self.index_terms.scan_prefix(prefix) {
            let (key, _) = item.map_err(storage_err)?;
            let hash_bytes = &key[key.len() - 32..];
            let mut arr = [0u8; 32];
            arr.copy_from_slice(hash_bytes);
            out.push(BlockHash::from_bytes(arr));
        }
        Ok(out)
    }

    pub fn clear_index(&self) -> Result<(), SigilError> {
        self.index_entries.clear().map_err(storage_err)?;
        self.index_terms.clear().map_err(storage_err)?;
        self.index_claims.clear().map_err(storage_err)?;
        Ok(())
    }

    // ── Indexing claims ──────────────────────────────────────────────────────

    /// Reserve the right to index `hash`. Put-if-absent: returns `true` to
    /// the single caller that won the reservation, `false` to the rest.
    pub fn try_claim_index(&self, hash: &BlockHash) -> Result<bool, SigilError> {
        let outcome = self
            .index_claims
            .compare_and_swap(
                hash.as_bytes(),
                None as Option<&[u8]>,
                Some(b"".as_ref()),
            )
            .map_err(storage_err)?;
        Ok(outcome.is_ok())
    }

    /// Release a reservation after the owning transaction aborts.
    pub fn release_index_claim(&self, hash: &BlockHash) -> Result<(), SigilError> {
        self.index_claims
            .remove(hash.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), SigilError> {
        self.meta
            .insert(key.as_bytes(), value)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, SigilError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }

    pub fn clear_meta(&self) -> Result<(), SigilError> {
        self.meta.clear().map_err(storage_err)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), SigilError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn open_temp() -> (tempfile::TempDir, LedgerDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn block_round_trip_and_hash_lookup() {
        let (_dir, db) = open_temp();
        let genesis = Block::genesis(1);
        db.put_block(&genesis).unwrap();

        assert_eq!(db.get_block(0).unwrap().unwrap(), genesis);
        assert_eq!(
            db.get_block_by_hash(&genesis.hash).unwrap().unwrap(),
            genesis
        );
        assert_eq!(db.block_count(), 1);
        assert_eq!(db.max_block_number().unwrap(), Some(0));
    }

    #[test]
    fn key_records_sort_by_creation() {
        let (_dir, db) = open_temp();
        let mut first = AuthorizedKey::new("pk".into(), "alice".into(), 100);
        first.is_active = false;
        first.revoked_at = Some(200);
        let second = AuthorizedKey::new("pk".into(), "alice".into(), 300);

        db.put_authorized_key(&second).unwrap();
        db.put_authorized_key(&first).unwrap();

        let records = db.key_records("pk").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].created_at, 100);
        assert_eq!(records[1].created_at, 300);
        assert_eq!(db.latest_key_record("pk").unwrap().unwrap().created_at, 300);
    }

    #[test]
    fn postings_do_not_bleed_across_prefixes() {
        let (_dir, db) = open_temp();
        let hash = BlockHash::from_bytes([1u8; 32]);
        let entry = IndexEntry {
            block_hash: hash,
            block_number: 1,
            category: None,
            bucket_timestamp: 0,
            public_tokens: BTreeSet::from(["abc".to_string()]),
            private_layer: None,
        };
        db.put_index_entry(&entry).unwrap();

        assert_eq!(db.blocks_with_token("abc").unwrap(), vec![hash]);
        // "ab" is a strict prefix of an indexed token, not a match.
        assert!(db.blocks_with_token("ab").unwrap().is_empty());
    }

    #[test]
    fn claim_is_put_if_absent() {
        let (_dir, db) = open_temp();
        let hash = BlockHash::from_bytes([2u8; 32]);
        assert!(db.try_claim_index(&hash).unwrap());
        assert!(!db.try_claim_index(&hash).unwrap());
        db.release_index_claim(&hash).unwrap();
        assert!(db.try_claim_index(&hash).unwrap());
    }

    #[test]
    fn delete_index_entry_removes_postings() {
        let (_dir, db) = open_temp();
        let hash = BlockHash::from_bytes([3u8; 32]);
        let entry = IndexEntry {
            block_hash: hash,
            block_number: 2,
            category: Some("audit".into()),
            bucket_timestamp: 0,
            public_tokens: BTreeSet::from(["ledger".to_string(), "audit".to_string()]),
            private_layer: None,
        };
        db.put_index_entry(&entry).unwrap();
        db.delete_index_entry(&hash).unwrap();

        assert!(db.get_index_entry(&hash).unwrap().is_none());
        assert!(db.blocks_with_token("ledger").unwrap().is_empty());
        assert!(db.blocks_with_token("audit").unwrap().is_empty());
    }
}
