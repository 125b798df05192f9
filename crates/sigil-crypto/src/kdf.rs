use sha3::Sha3_256;

use sigil_core::constants::AES_KEY_BYTES;

/// PBKDF2-HMAC-SHA3-256: stretch a password into an AES-256 key. The salt
/// and iteration count are recorded in the encryption envelope so future
/// readers can reproduce the derivation.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; AES_KEY_BYTES] {
    let mut key = [0u8; AES_KEY_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha3_256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// One-shot SHA3-256 of a deterministic password string, truncation-free:
/// the digest is exactly the AES-256 key length. Used for off-chain file
/// keys (`OFFCHAIN_<block>_<signer>`), where the password is derivable and
/// a memory-hard KDF adds nothing.
pub fn deterministic_key(material: &str) -> [u8; AES_KEY_BYTES] {
    *crate::hash::sha3_hash(material.as_bytes()).as_bytes()
}
