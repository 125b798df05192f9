//! sigil-crypto
//!
//! The ledger's cryptographic primitives: P-256 key pairs encoded as
//! base64 SubjectPublicKeyInfo, ECDSA signatures over SHA3-256 digests,
//! AES-256-GCM sealing, and PBKDF2-HMAC-SHA3-256 key derivation.

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod keypair;
pub mod sign;

pub use aead::{open, random_nonce, random_salt, seal};
pub use hash::{sha3_hash, sha3_hex, StreamingHasher};
pub use kdf::{derive_key, deterministic_key};
pub use keypair::KeyPair;
pub use sign::{sign, verify_signature};
