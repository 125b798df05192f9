//! sigil-index
//!
//! The two-layer search index: plaintext public tokens anyone can query,
//! and an AES-GCM-sealed private layer readable only with the block
//! password. Queries route through one of three strategies depending on
//! the credentials at hand.

pub mod entry;
pub mod extract;
pub mod search;
pub mod visibility;

pub use entry::{
    build_index_entry, decrypt_block_payload, decrypt_private_layer, encrypt_block_payload,
    IndexedBlock,
};
pub use extract::{extract_universal_tokens, normalize_term, validate_term};
pub use search::{SearchEngine, SearchMode, SearchOptions, SearchResult};
pub use visibility::{TermVisibility, TermVisibilityMap};
