use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use p256::ecdsa::signature::{DigestSigner, DigestVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use sha3::{Digest, Sha3_256};

use sigil_core::error::SigilError;

/// Sign `message` with a PKCS#8-encoded P-256 secret key. The message is
/// digested with SHA3-256 and the signature returned as base64 DER.
pub fn sign(secret_key_der: &[u8], message: &[u8]) -> Result<String, SigilError> {
    let signing_key = SigningKey::from_pkcs8_der(secret_key_der)
        .map_err(|e| SigilError::Crypto(format!("secret key decode: {e}")))?;
    let digest = Sha3_256::new_with_prefix(message);
    let signature: Signature = signing_key
        .try_sign_digest(digest)
        .map_err(|e| SigilError::Crypto(format!("signing failed: {e}")))?;
    Ok(B64.encode(signature.to_der().as_bytes()))
}

/// Verify a base64 DER ECDSA signature over the SHA3-256 digest of
/// `message`, under a base64-SPKI public key.
///
/// Malformed encodings and a failed verification both surface as errors;
/// callers that need a boolean match on `is_ok()`.
pub fn verify_signature(
    public_key_b64: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), SigilError> {
    let verifying_key = decode_public_key(public_key_b64)?;
    let der = B64
        .decode(signature_b64)
        .map_err(|e| SigilError::InvalidEncoding(format!("signature base64: {e}")))?;
    let signature = Signature::from_der(&der)
        .map_err(|e| SigilError::Crypto(format!("signature decode: {e}")))?;
    let digest = Sha3_256::new_with_prefix(message);
    verifying_key
        .verify_digest(digest, &signature)
        .map_err(|_| SigilError::Crypto("signature verification failed".into()))
}

/// Decode a base64 SubjectPublicKeyInfo string into a P-256 verifying key.
pub fn decode_public_key(public_key_b64: &str) -> Result<VerifyingKey, SigilError> {
    let der = B64
        .decode(public_key_b64)
        .map_err(|e| SigilError::InvalidEncoding(format!("public key base64: {e}")))?;
    VerifyingKey::from_public_key_der(&der)
        .map_err(|e| SigilError::Crypto(format!("public key decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate().unwrap();
        let message = b"append-only and proud of it";
        let sig = kp.sign(message).unwrap();
        assert!(verify_signature(&kp.public_key, message, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let kp = KeyPair::generate().unwrap();
        let sig = kp.sign(b"original").unwrap();
        assert!(verify_signature(&kp.public_key, b"tampered", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let kp = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        let sig = kp.sign(b"message").unwrap();
        assert!(verify_signature(&other.public_key, b"message", &sig).is_err());
    }

    #[test]
    fn malformed_public_key_is_an_encoding_error() {
        let kp = KeyPair::generate().unwrap();
        let sig = kp.sign(b"m").unwrap();
        let err = verify_signature("!!!", b"m", &sig).unwrap_err();
        assert_eq!(err.kind(), sigil_core::ErrorKind::InvalidInput);
    }
}
