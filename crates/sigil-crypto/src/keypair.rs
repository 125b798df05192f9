use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use sigil_core::error::SigilError;

/// A ledger signing identity: P-256 key pair with the public half encoded
/// as base64 SubjectPublicKeyInfo (the form stored on blocks and in the
/// authorization table).
///
/// The PKCS#8 secret key bytes are held in a `Zeroizing` buffer to wipe
/// memory on drop.
pub struct KeyPair {
    pub public_key: String,
    secret_key_der: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Generate a fresh P-256 keypair from the OS CSPRNG.
    pub fn generate() -> Result<Self, SigilError> {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(&signing_key)
    }

    /// Restore a keypair from its base64 PKCS#8 secret key encoding.
    /// The public half is re-derived, never trusted from the caller.
    pub fn from_secret_key_b64(b64: &str) -> Result<Self, SigilError> {
        let der = Zeroizing::new(
            B64.decode(b64)
                .map_err(|e| SigilError::InvalidEncoding(format!("secret key base64: {e}")))?,
        );
        let signing_key = SigningKey::from_pkcs8_der(&der)
            .map_err(|e| SigilError::Crypto(format!("secret key decode: {e}")))?;
        Self::from_signing_key(&signing_key)
    }

    fn from_signing_key(signing_key: &SigningKey) -> Result<Self, SigilError> {
        let public_der = signing_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| SigilError::Crypto(format!("public key encode: {e}")))?;
        let secret_der = signing_key
            .to_pkcs8_der()
            .map_err(|e| SigilError::Crypto(format!("secret key encode: {e}")))?;
        Ok(Self {
            public_key: B64.encode(public_der.as_bytes()),
            secret_key_der: Zeroizing::new(secret_der.as_bytes().to_vec()),
        })
    }

    /// Sign `message` with this keypair (ECDSA over a SHA3-256 digest).
    pub fn sign(&self, message: &[u8]) -> Result<String, SigilError> {
        crate::sign::sign(&self.secret_key_der, message)
    }

    /// Base64 PKCS#8 encoding of the secret key, for wallet-style storage.
    pub fn secret_key_b64(&self) -> String {
        B64.encode(self.secret_key_der.as_slice())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ public_key: {}… }}", &self.public_key[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_distinct() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn secret_round_trip_preserves_public_key() {
        let kp = KeyPair::generate().unwrap();
        let restored = KeyPair::from_secret_key_b64(&kp.secret_key_b64()).unwrap();
        assert_eq!(kp.public_key, restored.public_key);
    }

    #[test]
    fn garbage_secret_rejected() {
        assert!(KeyPair::from_secret_key_b64("not base64 !!").is_err());
        assert!(KeyPair::from_secret_key_b64(&B64.encode(b"short")).is_err());
    }
}
