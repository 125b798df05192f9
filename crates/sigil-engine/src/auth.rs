use tracing::{info, warn};

use sigil_core::error::SigilError;
use sigil_core::keys::{AddKeyOutcome, AuthorizedKey, DeletionImpact, RevokeOutcome};
use sigil_core::types::{now, Timestamp};
use sigil_crypto::sign::decode_public_key;
use sigil_store::LedgerDb;

/// The authorized-key lifecycle: who may sign, since when, until when.
///
/// Records are never reactivated — re-authorizing a revoked key inserts a
/// new record, so the full authorization timeline stays reconstructible
/// for historical validation.
pub struct KeyRegistry<'a> {
    db: &'a LedgerDb,
}

impl<'a> KeyRegistry<'a> {
    pub fn new(db: &'a LedgerDb) -> Self {
        Self { db }
    }

    /// Authorize a key from `timestamp` (default: now) onward.
    pub fn add(
        &self,
        public_key: &str,
        owner_name: &str,
        timestamp: Option<Timestamp>,
    ) -> Result<AddKeyOutcome, SigilError> {
        decode_public_key(public_key)?;

        if let Some(latest) = self.db.latest_key_record(public_key)? {
            if latest.is_active {
                return Ok(AddKeyOutcome::AlreadyActive);
            }
        }
        let record = AuthorizedKey::new(
            public_key.to_string(),
            owner_name.to_string(),
            timestamp.unwrap_or_else(now),
        );
        self.db.put_authorized_key(&record)?;
        info!(owner = owner_name, "authorized key added");
        Ok(AddKeyOutcome::Added)
    }

    /// Close the most recent active record for this key at now.
    pub fn revoke(&self, public_key: &str) -> Result<RevokeOutcome, SigilError> {
        match self.db.latest_key_record(public_key)? {
            Some(mut record) if record.is_active => {
                record.is_active = false;
                record.revoked_at = Some(now());
                self.db.put_authorized_key(&record)?;
                info!(owner = %record.owner_name, "authorized key revoked");
                Ok(RevokeOutcome::Revoked)
            }
            _ => Ok(RevokeOutcome::NotFound),
        }
    }

    pub fn is_active_now(&self, public_key: &str) -> Result<bool, SigilError> {
        Ok(self
            .db
            .latest_key_record(public_key)?
            .map(|record| record.is_active)
            .unwrap_or(false))
    }

    /// True iff `t` lies inside one of this key's authorization intervals.
    /// Monotone with respect to later revocations: a block authorized at
    /// its timestamp stays authorized at that timestamp.
    pub fn was_authorized_at(&self, public_key: &str, t: Timestamp) -> Result<bool, SigilError> {
        Ok(self
            .db
            .key_records(public_key)?
            .iter()
            .any(|record| record.covers(t)))
    }

    pub fn list_active(&self) -> Result<Vec<AuthorizedKey>, SigilError> {
        Ok(self
            .db
            .iter_all_keys()?
            .into_iter()
            .filter(|record| record.is_active)
            .collect())
    }

    pub fn list_all(&self) -> Result<Vec<AuthorizedKey>, SigilError> {
        self.db.iter_all_keys()
    }

    /// Full ordered record list for one key.
    pub fn get_key_history(&self, public_key: &str) -> Result<Vec<AuthorizedKey>, SigilError> {
        self.db.key_records(public_key)
    }

    /// Count the blocks this key has signed.
    pub fn count_blocks_signed_by(&self, public_key: &str) -> Result<u64, SigilError> {
        let mut count = 0u64;
        for block in self.db.iter_all_blocks()? {
            if block.signer_public_key == public_key {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn analyze_deletion_impact(&self, public_key: &str) -> Result<DeletionImpact, SigilError> {
        let exists = !self.db.key_records(public_key)?.is_empty();
        let affected = if exists {
            self.count_blocks_signed_by(public_key)?
        } else {
            0
        };
        Ok(DeletionImpact {
            exists,
            safe_to_delete: affected == 0,
            affected_blocks_count: affected,
            severe_impact: affected > 0,
        })
    }

    /// Hard-delete every record for the key, only if no block is signed
    /// by it. Returns the number of records removed.
    pub fn delete_safely(&self, public_key: &str) -> Result<u64, SigilError> {
        let impact = self.analyze_deletion_impact(public_key)?;
        if !impact.exists {
            return Err(SigilError::KeyNotFound(truncate_key(public_key)));
        }
        if !impact.safe_to_delete {
            return Err(SigilError::DeletionBlocked {
                blocks: impact.affected_blocks_count,
            });
        }
        self.db.delete_key_records(public_key)
    }

    /// Hard-delete with an explicit acknowledgement. With `force` unset
    /// this is the safe path; with `force` set the records go regardless,
    /// orphaning any historical blocks — the validator will report them
    /// as non-compliant from then on.
    pub fn delete_forced(
        &self,
        public_key: &str,
        reason: &str,
        force: bool,
    ) -> Result<u64, SigilError> {
        if !force {
            return self.delete_safely(public_key);
        }
        let impact = self.analyze_deletion_impact(public_key)?;
        if !impact.exists {
            return Err(SigilError::KeyNotFound(truncate_key(public_key)));
        }
        if impact.severe_impact {
            warn!(
                reason,
                affected_blocks = impact.affected_blocks_count,
                "force-deleting key with signed blocks"
            );
        }
        self.db.delete_key_records(public_key)
    }
}

fn truncate_key(public_key: &str) -> String {
    public_key.chars().take(24).collect()
}
