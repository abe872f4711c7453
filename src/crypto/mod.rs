//! Identity and signatures: the secp256k1 key pair and ECDSA/SHA-256.

pub mod keys;
pub mod signer;

pub use keys::KeyManager;
pub use signer::{Verifier, sign, verify};
