use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds since the Unix epoch, UTC.
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now() -> Timestamp {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Render a [`Timestamp`] as an RFC 3339 / ISO-8601 string (used in exports).
pub fn timestamp_to_rfc3339(ts: Timestamp) -> String {
    let dt: DateTime<Utc> = Utc.timestamp_nanos(ts);
    dt.to_rfc3339()
}

/// Parse an RFC 3339 string back into a [`Timestamp`].
pub fn timestamp_from_rfc3339(s: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .and_then(|dt| dt.timestamp_nanos_opt())
}

// ── BlockHash ────────────────────────────────────────────────────────────────

/// 32-byte SHA3-256 digest identifying a block (or an off-chain payload).
/// Displays as 64 lowercase hex characters; the all-zero value is the
/// genesis `previous_hash` sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The genesis sentinel: 64 zero characters in hex form.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}…)", &self.to_hex()[..16])
    }
}
