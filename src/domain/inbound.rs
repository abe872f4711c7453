//! Inbound events produced by the transport.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::RequestId;
use crate::protocol::Frame;

/// Transport event name for acknowledgements.
pub const ACK_EVENT: &str = "ack";
/// Transport event name for server-reported errors.
pub const ERR_EVENT: &str = "err";
/// Transport event name for pushed transfer notifications.
pub const TRANSFER_NOTIFICATION_EVENT: &str = "transfer";

/// Discriminator for inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The server accepted a command.
    Ack,
    /// The server rejected a command.
    Err,
    /// Unsolicited push (incoming transfer).
    Notification,
}

impl EventKind {
    /// Maps a transport event name to its kind, or `None` if unknown.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            ACK_EVENT => Some(Self::Ack),
            ERR_EVENT => Some(Self::Err),
            TRANSFER_NOTIFICATION_EVENT => Some(Self::Notification),
            _ => None,
        }
    }

    /// Returns the kind as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Err => "err",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event received from the server.
///
/// Not retained beyond handler dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct InboundEvent {
    /// Routing discriminator.
    pub kind: EventKind,
    /// Server payload. JSON text payloads are decoded into structured values.
    pub payload: serde_json::Value,
    /// Local receive timestamp.
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Creates an event of the given kind with the current timestamp.
    #[must_use]
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            received_at: Utc::now(),
        }
    }

    /// Builds an event from a transport frame, or `None` for unknown names.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Option<Self> {
        let kind = EventKind::from_event_name(&frame.event)?;
        Some(Self::new(kind, decode_text_payload(frame.data)))
    }

    /// Returns the request id the server echoed back, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        self.payload
            .get("requestId")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// Servers built on the same stack emit JSON documents as strings.
fn decode_text_payload(data: serde_json::Value) -> serde_json::Value {
    match data {
        serde_json::Value::String(text) => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
            } else {
                serde_json::Value::String(text)
            }
        }
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn frame(event: &str, data: serde_json::Value) -> Frame {
        Frame {
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn maps_known_event_names() {
        assert_eq!(EventKind::from_event_name("ack"), Some(EventKind::Ack));
        assert_eq!(EventKind::from_event_name("err"), Some(EventKind::Err));
        assert_eq!(
            EventKind::from_event_name("transfer"),
            Some(EventKind::Notification)
        );
        assert_eq!(EventKind::from_event_name("statement"), None);
    }

    #[test]
    fn decodes_json_text_payload() {
        let Some(event) = InboundEvent::from_frame(frame(
            "ack",
            serde_json::json!("{\"status\":\"ok\"}"),
        )) else {
            panic!("ack should map");
        };
        assert_eq!(event.payload["status"], "ok");
    }

    #[test]
    fn keeps_plain_text_payload() {
        let Some(event) = InboundEvent::from_frame(frame("err", serde_json::json!("denied")))
        else {
            panic!("err should map");
        };
        assert_eq!(event.payload, serde_json::json!("denied"));
    }

    #[test]
    fn extracts_echoed_request_id() {
        let id = RequestId::new();
        let event = InboundEvent::new(
            EventKind::Ack,
            serde_json::json!({ "requestId": id.to_string() }),
        );
        assert_eq!(event.request_id(), Some(id));
    }

    #[test]
    fn unknown_event_is_none() {
        assert!(InboundEvent::from_frame(frame("hello", serde_json::Value::Null)).is_none());
    }
}
