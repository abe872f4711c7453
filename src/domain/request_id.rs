//! Type-safe request identifier.
//!
//! [`RequestId`] is a newtype wrapper around [`uuid::Uuid`] (v4) attached to
//! outbound envelopes so that `ack` / `err` events can be correlated with
//! the command that triggered them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Client-generated identifier for one outbound command.
///
/// Wraps a UUID v4. Generated once per envelope and echoed back by servers
/// that support correlation. Used as the key in
/// [`crate::service::PendingRequests`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    /// Creates a new random `RequestId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<uuid::Uuid>().map(Self)
    }
}
