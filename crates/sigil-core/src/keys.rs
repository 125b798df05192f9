use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ── AuthorizedKey ────────────────────────────────────────────────────────────

/// One authorization record. A public key may accumulate several records
/// over time (authorize → revoke → authorize again); its authorization
/// timeline is the union of the `[created_at, revoked_at)` intervals.
/// Records are retained after revocation for historical validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedKey {
    /// Base64 SubjectPublicKeyInfo.
    pub public_key: String,
    pub owner_name: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub revoked_at: Option<Timestamp>,
}

impl AuthorizedKey {
    pub fn new(public_key: String, owner_name: String, created_at: Timestamp) -> Self {
        Self {
            public_key,
            owner_name,
            is_active: true,
            created_at,
            revoked_at: None,
        }
    }

    /// True iff `t` lies inside this record's authorization interval.
    pub fn covers(&self, t: Timestamp) -> bool {
        if self.created_at > t {
            return false;
        }
        match self.revoked_at {
            Some(revoked) => revoked > t,
            None => self.is_active,
        }
    }
}

// ── Operation outcomes ───────────────────────────────────────────────────────

/// Result of `add_authorized_key`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddKeyOutcome {
    Added,
    /// The most recent record for this key is already active; nothing inserted.
    AlreadyActive,
}

/// Result of `revoke_authorized_key`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    NotFound,
}

/// Report from `analyze_deletion_impact`: what hard-deleting every record
/// for a key would do to the ledger's compliance story.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeletionImpact {
    pub exists: bool,
    /// True iff no block in the ledger is signed by this key.
    pub safe_to_delete: bool,
    pub affected_blocks_count: u64,
    /// Deleting would orphan historical blocks; the validator will report
    /// them as non-compliant afterwards.
    pub severe_impact: bool,
}
