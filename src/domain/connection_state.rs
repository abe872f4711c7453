//! Connection lifecycle states.

use std::fmt;

use serde::Serialize;

/// State of the single logical connection.
///
/// ```text
/// Disconnected ──open()──▶ Connecting ──connect signal──▶ Connected ──AUTH ack──▶ Authenticated
///      ▲                       │                            │                          │
///      └───────────────────────┴──── error / close / heartbeat timeout ────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport link.
    #[default]
    Disconnected,
    /// Link requested, waiting for the transport's connect-success signal.
    Connecting,
    /// Link up; commands may be sent.
    Connected,
    /// The server acknowledged an AUTH command on this link.
    Authenticated,
}

impl ConnectionState {
    /// Returns `true` if the state permits transmitting commands.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// Any state may fall back to [`ConnectionState::Disconnected`].
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connected, Self::Authenticated)
                | (
                    Self::Connecting | Self::Connected | Self::Authenticated,
                    Self::Disconnected
                )
        )
    }

    /// Returns the state name as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::{Authenticated, Connected, Connecting, Disconnected};

    #[test]
    fn forward_path_is_legal() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Authenticated));
    }

    #[test]
    fn every_live_state_can_drop() {
        for state in [Connecting, Connected, Authenticated] {
            assert!(state.can_transition_to(Disconnected), "{state} -> disconnected");
        }
    }

    #[test]
    fn skipping_states_is_illegal() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Authenticated));
        assert!(!Connecting.can_transition_to(Authenticated));
        assert!(!Authenticated.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Disconnected));
    }

    #[test]
    fn only_link_up_states_are_connected() {
        assert!(!Disconnected.is_connected());
        assert!(!Connecting.is_connected());
        assert!(Connected.is_connected());
        assert!(Authenticated.is_connected());
    }
}
