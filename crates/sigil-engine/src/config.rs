use std::path::{Path, PathBuf};

use sigil_core::constants::{
    DEFAULT_CHUNK_BYTES, DEFAULT_MAX_ON_CHAIN_BYTES, DEFAULT_MAX_ON_CHAIN_CHARS,
    DEFAULT_OFF_CHAIN_THRESHOLD_BYTES, DEFAULT_VALIDATION_BATCH_SIZE, MAX_ON_CHAIN_BYTES_LIMIT,
};
use sigil_core::error::SigilError;

/// Engine configuration. Plain data — no file or environment parsing here.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Directory for the sled database.
    pub data_dir: PathBuf,
    /// Directory owned by the off-chain store.
    pub off_chain_dir: PathBuf,
    /// Payloads at or above this byte length are routed off-chain.
    pub off_chain_threshold_bytes: u64,
    /// Maximum UTF-8 byte length for an on-chain payload.
    pub max_on_chain_bytes: u64,
    /// Maximum character count for an on-chain payload.
    pub max_on_chain_chars: usize,
    /// Blocks walked per validator batch.
    pub validation_batch_size: u64,
    /// Plaintext chunk size for off-chain streaming.
    pub chunk_bytes: usize,
}

impl LedgerConfig {
    /// Defaults rooted at `root`: database under `root/db`, off-chain
    /// files under `root/off-chain`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("db"),
            off_chain_dir: root.join("off-chain"),
            off_chain_threshold_bytes: DEFAULT_OFF_CHAIN_THRESHOLD_BYTES,
            max_on_chain_bytes: DEFAULT_MAX_ON_CHAIN_BYTES,
            max_on_chain_chars: DEFAULT_MAX_ON_CHAIN_CHARS,
            validation_batch_size: DEFAULT_VALIDATION_BATCH_SIZE,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }

    pub fn with_off_chain_threshold(mut self, bytes: u64) -> Self {
        self.off_chain_threshold_bytes = bytes;
        self
    }

    pub fn with_max_on_chain_bytes(mut self, bytes: u64) -> Self {
        self.max_on_chain_bytes = bytes;
        self
    }

    pub fn with_max_on_chain_chars(mut self, chars: usize) -> Self {
        self.max_on_chain_chars = chars;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SigilError> {
        if self.max_on_chain_bytes == 0 || self.max_on_chain_bytes > MAX_ON_CHAIN_BYTES_LIMIT {
            return Err(SigilError::InvalidConfig(format!(
                "max_on_chain_bytes must be in 1..={MAX_ON_CHAIN_BYTES_LIMIT}"
            )));
        }
        if self.off_chain_threshold_bytes == 0
            || self.off_chain_threshold_bytes > self.max_on_chain_bytes
        {
            return Err(SigilError::InvalidConfig(
                "off_chain_threshold_bytes must be in 1..=max_on_chain_bytes".into(),
            ));
        }
        if self.validation_batch_size == 0 {
            return Err(SigilError::InvalidConfig(
                "validation_batch_size must be at least 1".into(),
            ));
        }
        if self.chunk_bytes == 0 {
            return Err(SigilError::InvalidConfig(
                "chunk_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
