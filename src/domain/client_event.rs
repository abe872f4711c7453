//! Observable client events.
//!
//! Every state transition, emitted command, and routed inbound event is
//! published as a [`ClientEvent`] through the [`super::EventBus`]. The binary
//! logs them; tests use them to observe the connection lifecycle.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ConnectionState, InboundEvent, RequestId};
use crate::protocol::CommandKind;

/// Event published on the [`super::EventBus`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The connection state machine moved.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
        /// Transition timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A signed envelope was handed to the transport.
    CommandSent {
        /// Correlation id attached to the envelope.
        request_id: RequestId,
        /// Command type.
        command: CommandKind,
        /// Nonce the envelope was signed with.
        nonce: u64,
        /// Emission timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An inbound event was routed.
    Inbound {
        /// The routed event.
        event: InboundEvent,
    },

    /// The recurring heartbeat task started.
    HeartbeatStarted {
        /// Interval between PING commands in milliseconds.
        interval_ms: u64,
        /// Start timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The recurring heartbeat task was cancelled.
    HeartbeatStopped {
        /// Stop timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The reconnect policy scheduled another connection attempt.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt in milliseconds.
        delay_ms: u64,
        /// Scheduling timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::CommandSent { .. } => "command_sent",
            Self::Inbound { .. } => "inbound",
            Self::HeartbeatStarted { .. } => "heartbeat_started",
            Self::HeartbeatStopped { .. } => "heartbeat_stopped",
            Self::Reconnecting { .. } => "reconnecting",
        }
    }
}
