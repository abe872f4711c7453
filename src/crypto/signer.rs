//! ECDSA over secp256k1 with SHA-256 message digests.
//!
//! Signatures are DER-encoded, which is what the server's verifier expects
//! (`SHA256withECDSA`). Verification is implemented symmetrically so the
//! server role can be exercised in tests.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k256::ecdsa::signature::{DigestSigner, DigestVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::ClientError;
use crate::protocol::{CanonicalScheme, CommandKind, CommandParams, Envelope};

/// Signs SHA-256(`message`) with `key`, returning a DER signature.
///
/// # Errors
///
/// Returns [`ClientError::Signing`] if the primitive rejects the operation.
pub fn sign(key: &SigningKey, message: &[u8]) -> Result<Vec<u8>, ClientError> {
    let signature: Signature = key
        .try_sign_digest(Sha256::new_with_prefix(message))
        .map_err(|e| ClientError::Signing(e.to_string()))?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Returns `true` if `signature` (DER) is valid for `message` under the
/// SEC1-encoded `public_key`. Malformed keys or signatures yield `false`.
#[must_use]
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    VerifyingKey::from_sec1_bytes(public_key)
        .is_ok_and(|key| verify_with_key(&key, message, signature))
}

fn verify_with_key(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    key.verify_digest(Sha256::new_with_prefix(message), &signature)
        .is_ok()
}

/// Verifier bound to one public key.
#[derive(Debug, Clone)]
pub struct Verifier {
    key: VerifyingKey,
}

impl Verifier {
    /// Creates a verifier from a key already in memory.
    #[must_use]
    pub const fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Creates a verifier from the base64 wire form of a public key.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSignature`] if the text does not decode
    /// to a valid secp256k1 point.
    pub fn from_public_key_base64(encoded: &str) -> Result<Self, ClientError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| ClientError::InvalidSignature)?;
        let key = VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| ClientError::InvalidSignature)?;
        Ok(Self { key })
    }

    /// Returns `true` if the DER `signature` is valid for `message`.
    #[must_use]
    pub fn is_valid(&self, message: &[u8], signature: &[u8]) -> bool {
        verify_with_key(&self.key, message, signature)
    }

    /// Checks the DER `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSignature`] if verification fails.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), ClientError> {
        if self.is_valid(message, signature) {
            Ok(())
        } else {
            Err(ClientError::InvalidSignature)
        }
    }

    /// Rebuilds the canonical string of a received envelope and checks its
    /// `signed` field, the way the server does.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParams`] if the params do not fit
    /// `kind`, [`ClientError::UnsupportedApiVersion`] for unknown versions,
    /// and [`ClientError::InvalidSignature`] if the signature does not
    /// verify or the envelope was signed by another key.
    pub fn verify_envelope(&self, kind: CommandKind, envelope: &Envelope) -> Result<(), ClientError> {
        let envelope_key = Self::from_public_key_base64(&envelope.key)?;
        if envelope_key.key != self.key {
            return Err(ClientError::InvalidSignature);
        }
        let params = CommandParams::from_envelope_params(kind, envelope.params.as_ref())?;
        let scheme = CanonicalScheme::for_api_version(envelope.api_version)?;
        let canonical = scheme.canonicalize(&envelope.key, envelope.nonce, &params);
        let signature = BASE64
            .decode(&envelope.signed)
            .map_err(|_| ClientError::InvalidSignature)?;
        self.verify(&canonical, &signature)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::crypto::KeyManager;

    fn keys() -> KeyManager {
        let Ok(keys) = KeyManager::generate() else {
            panic!("key generation should succeed");
        };
        keys
    }

    fn signed(keys: &KeyManager, message: &[u8]) -> Vec<u8> {
        let Ok(signature) = keys.sign(message) else {
            panic!("signing should succeed");
        };
        signature
    }

    #[test]
    fn sign_then_verify_round_trip() {
        let keys = keys();
        for message in [&b""[..], b"PING", b"AUTHkey1000", &[0xffu8; 300][..]] {
            let signature = signed(&keys, message);
            assert!(verify(&keys.public_key_bytes(), message, &signature));
        }
    }

    #[test]
    fn any_altered_message_byte_fails() {
        let keys = keys();
        let message = b"TRANSFERkey20009120000001".to_vec();
        let signature = signed(&keys, &message);
        for i in 0..message.len() {
            let mut tampered = message.clone();
            if let Some(b) = tampered.get_mut(i) {
                *b ^= 0x01;
            }
            assert!(
                !verify(&keys.public_key_bytes(), &tampered, &signature),
                "tampered message byte {i} still verified"
            );
        }
    }

    #[test]
    fn any_altered_signature_byte_fails() {
        let keys = keys();
        let message = b"STATEMENTkey30009120000001";
        let signature = signed(&keys, message);
        for i in 0..signature.len() {
            let mut tampered = signature.clone();
            if let Some(b) = tampered.get_mut(i) {
                *b ^= 0x01;
            }
            assert!(
                !verify(&keys.public_key_bytes(), message, &tampered),
                "tampered signature byte {i} still verified"
            );
        }
    }

    #[test]
    fn wrong_key_fails() {
        let signer = keys();
        let other = keys();
        let signature = signed(&signer, b"PING");
        assert!(!verify(&other.public_key_bytes(), b"PING", &signature));
    }

    #[test]
    fn malformed_inputs_are_false_not_errors() {
        let keys = keys();
        assert!(!verify(b"short", b"m", b"sig"));
        assert!(!verify(&keys.public_key_bytes(), b"m", b"not der"));
    }

    #[test]
    fn verifier_reports_invalid_signature() {
        let keys = keys();
        let Ok(verifier) = Verifier::from_public_key_base64(keys.public_key_base64()) else {
            panic!("public key should decode");
        };
        let signature = signed(&keys, b"AUTH");
        assert!(verifier.verify(b"AUTH", &signature).is_ok());
        assert!(matches!(
            verifier.verify(b"AUTX", &signature),
            Err(ClientError::InvalidSignature)
        ));
    }
}
