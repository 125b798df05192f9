pub mod block;
pub mod constants;
pub mod error;
pub mod index;
pub mod keys;
pub mod types;

pub use block::*;
pub use constants::*;
pub use error::{ErrorKind, SigilError};
pub use index::{coarse_bucket, IndexEntry, PrivatePayload};
pub use keys::*;
pub use types::*;
