//! Wire envelope and transport frames.
//!
//! An [`Envelope`] is the signed JSON object emitted for every command:
//!
//! ```json
//! {
//!   "apiVersion": 2,
//!   "key": "<base64 public key>",
//!   "nonce": 1700000000000,
//!   "params": { "accountNumber": "9120000001", "limit": 10 },
//!   "signed": "<base64 DER signature>",
//!   "requestId": "4b1c..."
//! }
//! ```
//!
//! It travels as the pretty-printed JSON text payload of a transport
//! [`Frame`] named after the command (`auth`, `transfer`, ...).

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use super::{CanonicalScheme, CommandParams};
use crate::crypto::KeyManager;
use crate::domain::RequestId;
use crate::error::ClientError;

/// A named event carried by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Transport event name.
    pub event: String,
    /// Event payload.
    pub data: serde_json::Value,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Signed command envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Protocol version; selects the canonicalization scheme.
    pub api_version: u32,
    /// Base64 public key of the signer.
    pub key: String,
    /// Anti-replay nonce.
    pub nonce: u64,
    /// Command parameters, absent for AUTH and PING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Base64 DER signature over the canonical string.
    pub signed: String,
    /// Correlation id; not covered by the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl Envelope {
    /// Wraps the envelope in a frame named after the command, with the
    /// envelope pretty-printed as the string payload.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Serialization`] if encoding fails.
    pub fn to_frame(&self, event: &str) -> Result<Frame, ClientError> {
        let text = serde_json::to_string_pretty(self)?;
        Ok(Frame::new(event, serde_json::Value::String(text)))
    }

    /// Recovers an envelope from a frame payload (JSON text or object).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Serialization`] if the payload is not an
    /// envelope.
    pub fn from_frame_data(data: &serde_json::Value) -> Result<Self, ClientError> {
        match data {
            serde_json::Value::String(text) => Ok(serde_json::from_str(text)?),
            other => Ok(Self::deserialize(other)?),
        }
    }
}

/// Canonicalize, sign, and assemble: the pure half of command dispatch.
///
/// Holds no mutable state; nonce issuance and transmission ordering are the
/// dispatcher's job.
#[derive(Debug, Clone)]
pub struct EnvelopeSealer {
    keys: Arc<KeyManager>,
    scheme: CanonicalScheme,
}

impl EnvelopeSealer {
    /// Creates a sealer for the given identity and `apiVersion`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnsupportedApiVersion`] if no scheme exists for
    /// `api_version`.
    pub fn new(keys: Arc<KeyManager>, api_version: u32) -> Result<Self, ClientError> {
        Ok(Self {
            keys,
            scheme: CanonicalScheme::for_api_version(api_version)?,
        })
    }

    /// Returns the canonical bytes for `params` at `nonce` under this
    /// sealer's key and scheme.
    #[must_use]
    pub fn canonical_bytes(&self, nonce: u64, params: &CommandParams) -> Vec<u8> {
        self.scheme
            .canonicalize(self.keys.public_key_base64(), nonce, params)
    }

    /// Builds the signed envelope for `params` at `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Signing`] if signing fails and
    /// [`ClientError::Serialization`] if the params cannot be encoded.
    pub fn seal(
        &self,
        params: &CommandParams,
        nonce: u64,
        request_id: Option<RequestId>,
    ) -> Result<Envelope, ClientError> {
        let canonical = self.canonical_bytes(nonce, params);
        let signature = self.keys.sign(&canonical)?;
        Ok(Envelope {
            api_version: self.scheme.api_version(),
            key: self.keys.public_key_base64().to_string(),
            nonce,
            params: params.to_wire()?,
            signed: BASE64.encode(signature),
            request_id,
        })
    }
}
