//! ─── Sigil Ledger Constants ─────────────────────────────────────────────────
//!
//! Protocol-level constants: genesis sentinels, payload limits, KDF
//! parameters, export format versions.

// ── Genesis sentinels ────────────────────────────────────────────────────────

/// Block number of the genesis block.
pub const GENESIS_BLOCK_NUMBER: u64 = 0;

/// Sentinel signer public key carried by the genesis block.
pub const GENESIS_SIGNER: &str = "GENESIS";

/// Sentinel signature carried by the genesis block.
pub const GENESIS_SIGNATURE: &str = "GENESIS";

// ── Payload routing ──────────────────────────────────────────────────────────

/// Prefix marking a block whose payload lives in the off-chain file store.
/// The remainder of the `data` field is the hex SHA3-256 of the plaintext.
pub const OFF_CHAIN_PREFIX: &str = "OFF_CHAIN_REF:";

/// Default byte length at which payloads are routed off-chain.
pub const DEFAULT_OFF_CHAIN_THRESHOLD_BYTES: u64 = 512 * 1024;

/// Hard ceiling for off-chain payloads.
pub const MAX_OFF_CHAIN_BYTES: u64 = 100 * 1024 * 1024;

/// Default maximum UTF-8 byte length for on-chain payloads.
pub const DEFAULT_MAX_ON_CHAIN_BYTES: u64 = 1024 * 1024;

/// Upper bound a deployment may raise the on-chain byte limit to.
pub const MAX_ON_CHAIN_BYTES_LIMIT: u64 = 10 * 1024 * 1024;

/// Default maximum character count for on-chain payloads.
pub const DEFAULT_MAX_ON_CHAIN_CHARS: usize = 10_000;

// ── Key derivation / encryption ──────────────────────────────────────────────

/// KDF identifier recorded in every on-chain encryption envelope.
pub const KDF_ALGORITHM: &str = "pbkdf2-hmac-sha3-256";

/// PBKDF2 iteration count for password-derived AES keys.
pub const PBKDF2_ITERATIONS: u32 = 200_000;

/// Random salt length in bytes (128 bits).
pub const SALT_BYTES: usize = 16;

/// AES-GCM nonce length in bytes (96 bits).
pub const NONCE_BYTES: usize = 12;

/// AES-256 key length in bytes.
pub const AES_KEY_BYTES: usize = 32;

/// Minimum password length for on-chain encryption and private index layers.
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Prefix of the deterministic password for off-chain files:
/// `OFFCHAIN_<block_number>_<signer_public_key>` hashed by SHA3-256.
pub const OFF_CHAIN_PASSWORD_PREFIX: &str = "OFFCHAIN_";

/// Plaintext chunk size for streaming off-chain encryption.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

// ── Search index ─────────────────────────────────────────────────────────────

/// Terms shorter than this are rejected unless they match a universal
/// token pattern (year, currency code, acronym, short ID).
pub const MIN_TERM_CHARS: usize = 4;

/// Coarse public-layer timestamp bucket: one day, in nanoseconds.
pub const COARSE_BUCKET_NANOS: i64 = 86_400 * 1_000_000_000;

// ── Validation ───────────────────────────────────────────────────────────────

/// Default number of blocks a validator walks per batch.
pub const DEFAULT_VALIDATION_BATCH_SIZE: u64 = 100;

// ── Export format ────────────────────────────────────────────────────────────

/// Version string of the export document format.
pub const EXPORT_FORMAT_VERSION: &str = "2.0";

/// Version string of the nested encryption bundle.
pub const ENCRYPTION_BUNDLE_VERSION: &str = "1.0";

/// Sibling directory holding copied off-chain files next to an export.
pub const OFF_CHAIN_BACKUP_DIR: &str = "off-chain-backup";
