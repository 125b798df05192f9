//! sigil-store
//!
//! Persistent ledger state backed by sled: the block table, the
//! authorized-key history, the two-layer search index rows, the
//! indexing-claim set, and the durable block sequence.

pub mod db;
pub mod sequence;

pub use db::LedgerDb;
