use thiserror::Error;

/// Coarse classification of a [`SigilError`], mirroring the operation
/// contracts: callers branch on the kind, messages carry the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unauthorized,
    Integrity,
    Crypto,
    Storage,
    Conflict,
    NotFound,
    Version,
}

#[derive(Debug, Error)]
pub enum SigilError {
    // ── Input errors ─────────────────────────────────────────────────────────
    #[error("payload too large: {got} bytes exceeds limit of {max}")]
    PayloadTooLarge { got: u64, max: u64 },

    #[error("payload too long: {got} characters exceeds limit of {max}")]
    PayloadTooManyChars { got: usize, max: usize },

    #[error("weak password: need at least {min} characters with a letter and a digit")]
    WeakPassword { min: usize },

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Authorization errors ─────────────────────────────────────────────────
    #[error("signer key is not currently authorized: {0}")]
    UnauthorizedSigner(String),

    #[error("unsafe key deletion: {blocks} historical blocks are signed by this key")]
    DeletionBlocked { blocks: u64 },

    // ── Integrity errors ─────────────────────────────────────────────────────
    #[error("hash mismatch for block {block_number}")]
    HashMismatch { block_number: u64 },

    #[error("previous-hash link broken at block {block_number}")]
    LinkMismatch { block_number: u64 },

    #[error("signature verification failed for block {block_number}")]
    SignatureMismatch { block_number: u64 },

    #[error("off-chain integrity failure: {0}")]
    OffChainIntegrity(String),

    #[error("authentication tag mismatch")]
    TagMismatch,

    // ── Crypto errors ────────────────────────────────────────────────────────
    #[error("crypto failure: {0}")]
    Crypto(String),

    // ── Storage errors ───────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("file I/O error: {0}")]
    Io(String),

    // ── Conflict ─────────────────────────────────────────────────────────────
    #[error("exclusive ledger access not acquired before the deadline")]
    LockDeadline,

    #[error("indexing already claimed for block {0}")]
    IndexClaimHeld(String),

    // ── Not found ────────────────────────────────────────────────────────────
    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("no block with hash {0}")]
    BlockHashNotFound(String),

    #[error("authorized key not found: {0}")]
    KeyNotFound(String),

    // ── Version / format ─────────────────────────────────────────────────────
    #[error("unsupported export format version: {0}")]
    UnsupportedExportVersion(String),

    #[error("export flavor mismatch: encrypted exports require the encrypted importer")]
    ImportFlavorMismatch,

    #[error("malformed export document: {0}")]
    MalformedExport(String),

    // ── Structural guards ────────────────────────────────────────────────────
    #[error("the genesis block cannot be removed")]
    GenesisProtected,

    #[error("rollback of {requested} blocks exceeds the {available} removable blocks")]
    RollbackTooDeep { requested: u64, available: u64 },

    #[error("{0}")]
    Other(String),
}

impl SigilError {
    pub fn kind(&self) -> ErrorKind {
        use SigilError::*;
        match self {
            PayloadTooLarge { .. }
            | PayloadTooManyChars { .. }
            | WeakPassword { .. }
            | InvalidEncoding(_)
            | InvalidConfig(_) => ErrorKind::InvalidInput,

            UnauthorizedSigner(_) | DeletionBlocked { .. } => ErrorKind::Unauthorized,

            HashMismatch { .. }
            | LinkMismatch { .. }
            | SignatureMismatch { .. }
            | OffChainIntegrity(_)
            | TagMismatch => ErrorKind::Integrity,

            Crypto(_) => ErrorKind::Crypto,

            Storage(_) | Serialization(_) | Io(_) => ErrorKind::Storage,

            LockDeadline | IndexClaimHeld(_) => ErrorKind::Conflict,

            BlockNotFound(_) | BlockHashNotFound(_) | KeyNotFound(_) => ErrorKind::NotFound,

            UnsupportedExportVersion(_) | ImportFlavorMismatch | MalformedExport(_) => {
                ErrorKind::Version
            }

            GenesisProtected | RollbackTooDeep { .. } | Other(_) => ErrorKind::InvalidInput,
        }
    }
}

impl From<std::io::Error> for SigilError {
    fn from(e: std::io::Error) -> Self {
        SigilError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_classify_by_concern() {
        assert_eq!(
            SigilError::PayloadTooLarge { got: 2, max: 1 }.kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(SigilError::TagMismatch.kind(), ErrorKind::Integrity);
        assert_eq!(SigilError::BlockNotFound(3).kind(), ErrorKind::NotFound);
        assert_eq!(
            SigilError::ImportFlavorMismatch.kind(),
            ErrorKind::Version
        );
    }
}
