use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::block::PrivateTermsBlob;
use crate::constants::COARSE_BUCKET_NANOS;
use crate::types::{BlockHash, Timestamp};

// ── IndexEntry ───────────────────────────────────────────────────────────────

/// Searchable metadata for one block, in two layers.
///
/// The public layer (tokens, category, coarse timestamp) is readable
/// without credentials. The private layer is an AES-GCM blob over the
/// private term set plus precise metadata, readable only with the block
/// password. A block appended without private terms has no blob, which is
/// equivalent to a zero-length private plaintext.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub block_hash: BlockHash,
    pub block_number: u64,
    pub category: Option<String>,
    /// Block timestamp rounded down to a day bucket; the precise instant
    /// lives in the private layer.
    pub bucket_timestamp: Timestamp,
    /// Normalized lowercase tokens: manual public terms plus automatic
    /// universal extraction.
    pub public_tokens: BTreeSet<String>,
    pub private_layer: Option<PrivateTermsBlob>,
}

/// Round a timestamp down to its coarse public bucket (day resolution).
pub fn coarse_bucket(ts: Timestamp) -> Timestamp {
    ts.div_euclid(COARSE_BUCKET_NANOS) * COARSE_BUCKET_NANOS
}

/// Precise metadata sealed inside the private layer next to the term set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivatePayload {
    pub terms: BTreeSet<String>,
    pub exact_timestamp: Timestamp,
    pub owner: Option<String>,
    /// Short narrative snippet of the block payload.
    pub snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_floors_to_day() {
        let day = COARSE_BUCKET_NANOS;
        assert_eq!(coarse_bucket(0), 0);
        assert_eq!(coarse_bucket(day - 1), 0);
        assert_eq!(coarse_bucket(day), day);
        assert_eq!(coarse_bucket(day + 123), day);
    }
}
