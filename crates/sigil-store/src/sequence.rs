use sigil_core::error::SigilError;

use crate::db::LedgerDb;

/// Meta-tree key holding the next block number to assign.
const SEQUENCE_KEY: &str = "block_number";

impl LedgerDb {
    /// Allocate the next block number, atomically under contention.
    ///
    /// A compare-and-swap loop on the durable meta row: two concurrent
    /// callers always receive distinct, contiguous values, and the
    /// sequence survives restarts. The initial next value is 1 — block 0
    /// is reserved for genesis and assigned at bootstrap.
    pub fn next_block_number(&self) -> Result<u64, SigilError> {
        loop {
            let current = self
                .meta
                .get(SEQUENCE_KEY.as_bytes())
                .map_err(|e| SigilError::Storage(e.to_string()))?;
            let value = match &current {
                Some(bytes) => decode_u64(bytes)?,
                None => 1,
            };
            let swap = self
                .meta
                .compare_and_swap(
                    SEQUENCE_KEY.as_bytes(),
                    current,
                    Some(&(value + 1).to_be_bytes()[..]),
                )
                .map_err(|e| SigilError::Storage(e.to_string()))?;
            if swap.is_ok() {
                return Ok(value);
            }
            // Lost the race; reread and retry.
        }
    }

    /// The next value the sequence would hand out, without advancing it.
    pub fn peek_block_number(&self) -> Result<u64, SigilError> {
        match self
            .meta
            .get(SEQUENCE_KEY.as_bytes())
            .map_err(|e| SigilError::Storage(e.to_string()))?
        {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(1),
        }
    }

    /// Force the sequence to `next`. Used by import (`max(block_number)+1`)
    /// and by clear-and-reinitialize.
    pub fn resync_sequence(&self, next: u64) -> Result<(), SigilError> {
        self.meta
            .insert(SEQUENCE_KEY.as_bytes(), &next.to_be_bytes())
            .map_err(|e| SigilError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64, SigilError> {
    if bytes.len() != 8 {
        return Err(SigilError::Storage(
            "corrupt block sequence row".to_string(),
        ));
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn sequence_starts_at_one_and_is_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(dir.path()).unwrap();
        assert_eq!(db.next_block_number().unwrap(), 1);
        assert_eq!(db.next_block_number().unwrap(), 2);
        assert_eq!(db.peek_block_number().unwrap(), 3);
    }

    #[test]
    fn resync_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(dir.path()).unwrap();
        db.next_block_number().unwrap();
        db.resync_sequence(42).unwrap();
        assert_eq!(db.next_block_number().unwrap(), 42);
    }

    #[test]
    fn concurrent_callers_get_distinct_values() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDb::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = Arc::clone(&db);
            handles.push(std::thread::spawn(move || {
                (0..50)
                    .map(|_| db.next_block_number().unwrap())
                    .collect::<Vec<u64>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate block number {value}");
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(*seen.iter().min().unwrap(), 1);
        assert_eq!(*seen.iter().max().unwrap(), 400);
    }
}
