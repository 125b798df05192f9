use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use sigil_core::constants::{NONCE_BYTES, SALT_BYTES};
use sigil_core::error::SigilError;

/// AES-256-GCM encrypt. The 16-byte authentication tag is appended to the
/// returned ciphertext.
pub fn seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_BYTES],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, SigilError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SigilError::Crypto(format!("aes key: {e}")))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| SigilError::Crypto("aes-gcm seal failed".into()))
}

/// AES-256-GCM decrypt-and-verify. A wrong key, wrong nonce, or tampered
/// ciphertext surfaces as [`SigilError::TagMismatch`].
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_BYTES],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, SigilError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SigilError::Crypto(format!("aes key: {e}")))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| SigilError::TagMismatch)
}

/// Fresh 96-bit nonce from the OS CSPRNG. Every AES-GCM invocation gets
/// its own.
pub fn random_nonce() -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Fresh 128-bit KDF salt from the OS CSPRNG.
pub fn random_salt() -> [u8; SALT_BYTES] {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [7u8; 32];
        let nonce = random_nonce();
        let ct = seal(&key, &nonce, b"secret", b"aad").unwrap();
        assert_eq!(open(&key, &nonce, &ct, b"aad").unwrap(), b"secret");
    }

    #[test]
    fn wrong_key_is_tag_mismatch() {
        let nonce = random_nonce();
        let ct = seal(&[1u8; 32], &nonce, b"secret", b"").unwrap();
        let err = open(&[2u8; 32], &nonce, &ct, b"").unwrap_err();
        assert!(matches!(err, SigilError::TagMismatch));
    }

    #[test]
    fn tampered_aad_is_tag_mismatch() {
        let key = [3u8; 32];
        let nonce = random_nonce();
        let ct = seal(&key, &nonce, b"secret", b"context-a").unwrap();
        assert!(open(&key, &nonce, &ct, b"context-b").is_err());
    }

    #[test]
    fn nonces_are_fresh() {
        assert_ne!(random_nonce(), random_nonce());
    }
}
