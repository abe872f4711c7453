//! Signing identity.
//!
//! [`KeyManager`] owns the process's secp256k1 key pair. The private key
//! never leaves this type except through the explicit operator export
//! [`KeyManager::private_key_base64`]; its `Debug` output is redacted.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;

use super::signer;
use crate::error::ClientError;

/// Out-of-range scalars are astronomically rare; a handful of draws is plenty.
const MAX_SCALAR_DRAWS: usize = 4;

/// Exclusive owner of the signing key pair.
///
/// Read-only after construction, so it can be shared across tasks behind
/// an `Arc`.
pub struct KeyManager {
    signing_key: SigningKey,
    /// Base64 of the uncompressed SEC1 public point, cached for envelopes.
    public_key_b64: String,
}

impl KeyManager {
    /// Generates a fresh key pair from the operating system's entropy source.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::KeyGeneration`] if the entropy source fails or
    /// no valid scalar could be drawn.
    pub fn generate() -> Result<Self, ClientError> {
        let mut seed = [0u8; 32];
        for _ in 0..MAX_SCALAR_DRAWS {
            OsRng
                .try_fill_bytes(&mut seed)
                .map_err(|e| ClientError::KeyGeneration(format!("entropy source: {e}")))?;
            if let Ok(signing_key) = SigningKey::from_slice(&seed) {
                seed.fill(0);
                return Ok(Self::from_signing_key(signing_key));
            }
        }
        seed.fill(0);
        Err(ClientError::KeyGeneration(
            "could not draw a valid secp256k1 scalar".to_string(),
        ))
    }

    /// Loads an existing identity from a base64-encoded 32-byte scalar.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::KeyGeneration`] if the text is not base64 or
    /// does not encode a valid secp256k1 private key.
    pub fn from_private_key_base64(encoded: &str) -> Result<Self, ClientError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ClientError::KeyGeneration(format!("private key is not base64: {e}")))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|_| ClientError::KeyGeneration("invalid secp256k1 private key".to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key_b64 = BASE64.encode(encode_public_key(signing_key.verifying_key()));
        Self {
            signing_key,
            public_key_b64,
        }
    }

    /// Returns the uncompressed SEC1 public key (`0x04 || X || Y`).
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_public_key(self.signing_key.verifying_key())
    }

    /// Returns the public key in its wire form (base64).
    #[must_use]
    pub fn public_key_base64(&self) -> &str {
        &self.public_key_b64
    }

    /// Returns the verifying half of the key pair.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Exports the private scalar as base64 for operator diagnostics.
    ///
    /// Never put this value on the wire or in logs.
    #[must_use]
    pub fn private_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.to_bytes())
    }

    /// Signs `message` and returns the DER-encoded signature.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Signing`] if the signing primitive fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ClientError> {
        signer::sign(&self.signing_key, message)
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("public_key", &self.public_key_b64)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn encode_public_key(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}
