//! sigil-offchain
//!
//! Encrypted file store for payloads too large to live on-chain. Each
//! payload is streamed through AES-256-GCM in framed chunks to a file
//! under a configured directory, with integrity metadata (plaintext
//! SHA3-256, ECDSA signature, base nonce, size, content type) returned
//! for the owning block to carry.

pub mod content_type;
pub mod store;

pub use content_type::sniff_content_type;
pub use store::{off_chain_password, OffChainStore};
