//! Client error types with numeric code mapping.
//!
//! [`ClientError`] is the central error type for the client. Each variant
//! maps to a numeric code and to a propagation class (fatal or
//! recoverable), mirroring how the caller is expected to react.

use std::time::Duration;

use crate::domain::RequestId;

/// Client-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category          | Propagation                         |
/// |-----------|-------------------|-------------------------------------|
/// | 1000–1999 | Validation        | rejected before any side effect     |
/// | 2000–2999 | Identity / crypto | key and signing failures are fatal  |
/// | 3000–3999 | Transport         | degrades connection state           |
/// | 4000–4999 | Server-reported   | surfaced from `err` events          |
/// | 5000–5999 | Configuration     | fatal at startup                    |
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Command parameters do not have the shape the command type requires.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// No canonicalization scheme exists for the requested API version.
    #[error("unsupported api version: {0}")]
    UnsupportedApiVersion(u32),

    /// The signing identity could not be created or loaded.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// The signing primitive failed for a single command.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A signature did not verify against its key and canonical string.
    #[error("invalid signature")]
    InvalidSignature,

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// No ACK or ERR arrived for a request within the allotted time.
    #[error("request {request_id} timed out after {} ms", .elapsed.as_millis())]
    Timeout {
        /// Request that went unanswered.
        request_id: RequestId,
        /// How long the client waited.
        elapsed: Duration,
    },

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server rejected a command because its nonce was not fresh.
    #[error("stale nonce: {0}")]
    NonceStale(String),

    /// Any other error reported by the server through an `err` event.
    #[error("server error: {message}")]
    Server {
        /// Numeric code supplied by the server, if any.
        code: Option<i64>,
        /// Server-supplied message.
        message: String,
    },

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidParams(_) => 1001,
            Self::UnsupportedApiVersion(_) => 1002,
            Self::KeyGeneration(_) => 2001,
            Self::Signing(_) => 2002,
            Self::InvalidSignature => 2003,
            Self::Transport(_) => 3001,
            Self::Timeout { .. } => 3002,
            Self::Serialization(_) => 3003,
            Self::Server { .. } => 4000,
            Self::NonceStale(_) => 4001,
            Self::Config(_) => 5001,
        }
    }

    /// Returns `true` for failures the client cannot recover from locally.
    ///
    /// Identity and signing failures are fatal; everything else either
    /// rejects a single command or degrades the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::KeyGeneration(_) | Self::Signing(_) | Self::Config(_)
        )
    }

    /// Classifies the payload of an inbound `err` event.
    ///
    /// Accepts either a bare string or an object carrying `message` (or
    /// `error`) and an optional numeric `code`.
    #[must_use]
    pub fn from_server_payload(payload: &serde_json::Value) -> Self {
        let (code, message) = match payload {
            serde_json::Value::String(s) => (None, s.clone()),
            serde_json::Value::Object(map) => {
                let message = map
                    .get("message")
                    .or_else(|| map.get("error"))
                    .and_then(|v| v.as_str())
                    .map_or_else(|| payload.to_string(), str::to_string);
                (map.get("code").and_then(serde_json::Value::as_i64), message)
            }
            other => (None, other.to_string()),
        };

        let lowered = message.to_ascii_lowercase();
        if lowered.contains("nonce") {
            Self::NonceStale(message)
        } else if lowered.contains("signature") {
            Self::InvalidSignature
        } else {
            Self::Server { code, message }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_ranges() {
        assert_eq!(ClientError::InvalidParams(String::new()).error_code(), 1001);
        assert_eq!(ClientError::InvalidSignature.error_code(), 2003);
        assert_eq!(ClientError::Transport(String::new()).error_code(), 3001);
        assert_eq!(ClientError::NonceStale(String::new()).error_code(), 4001);
    }

    #[test]
    fn identity_failures_are_fatal() {
        assert!(ClientError::KeyGeneration("no entropy".into()).is_fatal());
        assert!(ClientError::Signing("bad scalar".into()).is_fatal());
        assert!(!ClientError::InvalidSignature.is_fatal());
        assert!(!ClientError::Transport("reset".into()).is_fatal());
    }

    #[test]
    fn classifies_stale_nonce() {
        let payload = serde_json::json!({ "code": 401, "message": "Invalid nonce" });
        let ClientError::NonceStale(msg) = ClientError::from_server_payload(&payload) else {
            panic!("expected stale nonce");
        };
        assert_eq!(msg, "Invalid nonce");
    }

    #[test]
    fn classifies_bad_signature_string() {
        let payload = serde_json::json!("Signature verification failed");
        assert!(matches!(
            ClientError::from_server_payload(&payload),
            ClientError::InvalidSignature
        ));
    }

    #[test]
    fn other_payloads_become_server_errors() {
        let payload = serde_json::json!({ "code": 17, "error": "insufficient funds" });
        let ClientError::Server { code, message } = ClientError::from_server_payload(&payload)
        else {
            panic!("expected server error");
        };
        assert_eq!(code, Some(17));
        assert_eq!(message, "insufficient funds");
    }
}
