//! Socket.IO v5 / Engine.IO v4 text packet codec.
//!
//! Only the subset the client needs is understood:
//!
//! | Text                     | Meaning                              |
//! |--------------------------|--------------------------------------|
//! | `0{"sid":..}`            | Engine.IO open handshake             |
//! | `1`                      | Engine.IO close                      |
//! | `2` / `3`                | Engine.IO ping / pong                |
//! | `40`                     | Socket.IO connect (both directions)  |
//! | `41`                     | Socket.IO disconnect                 |
//! | `42["name",data]`        | Socket.IO event                      |
//! | `44{"message":..}`       | Socket.IO connect error              |

use serde::Deserialize;
use url::Url;

use crate::error::ClientError;
use crate::protocol::Frame;

/// Sent after the Engine.IO handshake to join the default namespace.
pub const NAMESPACE_CONNECT: &str = "40";
/// Reply to an Engine.IO ping.
pub const ENGINE_PONG: &str = "3";

/// A decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO handshake.
    Open {
        /// Session id.
        sid: String,
        /// Server ping interval in milliseconds.
        ping_interval_ms: u64,
        /// Server ping timeout in milliseconds.
        ping_timeout_ms: u64,
    },
    /// Engine.IO close.
    Close,
    /// Engine.IO ping (must be answered with [`ENGINE_PONG`]).
    Ping,
    /// Engine.IO pong.
    Pong,
    /// Engine.IO no-op.
    Noop,
    /// Socket.IO namespace connect acknowledged.
    Connect,
    /// Socket.IO namespace disconnect.
    Disconnect,
    /// Socket.IO namespace connect refused.
    ConnectError(String),
    /// Socket.IO event.
    Event(Frame),
    /// A well-formed packet type the client ignores (acks, binary).
    Unsupported(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPayload {
    sid: String,
    #[serde(default)]
    ping_interval: u64,
    #[serde(default)]
    ping_timeout: u64,
}

/// Decodes one WebSocket text message.
///
/// # Errors
///
/// Returns [`ClientError::Transport`] for unknown packet types or
/// malformed bodies.
pub fn decode(text: &str) -> Result<Packet, ClientError> {
    let mut chars = text.chars();
    let kind = chars.next();
    let body = chars.as_str();
    match kind {
        Some('0') => {
            let open: OpenPayload = serde_json::from_str(body)
                .map_err(|e| malformed(&format!("open handshake: {e}")))?;
            Ok(Packet::Open {
                sid: open.sid,
                ping_interval_ms: open.ping_interval,
                ping_timeout_ms: open.ping_timeout,
            })
        }
        Some('1') => Ok(Packet::Close),
        Some('2') => Ok(Packet::Ping),
        Some('3') => Ok(Packet::Pong),
        Some('4') => decode_message(body),
        Some('6') => Ok(Packet::Noop),
        _ => Err(malformed(text)),
    }
}

fn decode_message(body: &str) -> Result<Packet, ClientError> {
    let mut chars = body.chars();
    let kind = chars.next();
    let rest = strip_namespace(chars.as_str());
    match kind {
        Some('0') => Ok(Packet::Connect),
        Some('1') => Ok(Packet::Disconnect),
        Some('2') => decode_event(rest),
        Some('4') => {
            let message = serde_json::from_str::<serde_json::Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| rest.to_string());
            Ok(Packet::ConnectError(message))
        }
        Some(other) => Ok(Packet::Unsupported(format!("socket.io packet type {other}"))),
        None => Err(malformed("empty message packet")),
    }
}

/// Drops an optional `/namespace,` prefix.
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        rest.split_once(',').map_or("", |(_, tail)| tail)
    } else {
        rest
    }
}

fn decode_event(rest: &str) -> Result<Packet, ClientError> {
    // Events that request an ack carry a numeric id before the array.
    let array = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let items: Vec<serde_json::Value> =
        serde_json::from_str(array).map_err(|e| malformed(&format!("event body: {e}")))?;
    let mut items = items.into_iter();
    let Some(serde_json::Value::String(event)) = items.next() else {
        return Err(malformed("event without a name"));
    };
    let data = items.next().unwrap_or(serde_json::Value::Null);
    Ok(Packet::Event(Frame { event, data }))
}

/// Encodes a frame as a Socket.IO event packet (`42["name",data]`).
///
/// # Errors
///
/// Returns [`ClientError::Serialization`] if the payload cannot be encoded.
pub fn encode_event(frame: &Frame) -> Result<String, ClientError> {
    let body = serde_json::to_string(&(&frame.event, &frame.data))?;
    Ok(format!("42{body}"))
}

/// Rewrites an `http(s)://host:port` server address into the Engine.IO
/// WebSocket endpoint.
///
/// # Errors
///
/// Returns [`ClientError::Config`] if the address is not a URL or uses an
/// unsupported scheme.
pub fn endpoint(server: &str) -> Result<Url, ClientError> {
    let mut url =
        Url::parse(server).map_err(|e| ClientError::Config(format!("server url `{server}`: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::Config(format!(
                "unsupported server url scheme `{other}`"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::Config(format!("cannot use scheme `{scheme}`")))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

fn malformed(detail: &str) -> ClientError {
    ClientError::Transport(format!("malformed socket.io packet: {detail}"))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decodes_open_handshake() {
        let packet = decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#);
        let Ok(Packet::Open {
            sid,
            ping_interval_ms,
            ping_timeout_ms,
        }) = packet
        else {
            panic!("expected open packet");
        };
        assert_eq!(sid, "abc");
        assert_eq!(ping_interval_ms, 25_000);
        assert_eq!(ping_timeout_ms, 20_000);
    }

    #[test]
    fn decodes_engine_control_packets() {
        assert_eq!(decode("1").ok(), Some(Packet::Close));
        assert_eq!(decode("2").ok(), Some(Packet::Ping));
        assert_eq!(decode("3").ok(), Some(Packet::Pong));
        assert_eq!(decode("6").ok(), Some(Packet::Noop));
    }

    #[test]
    fn decodes_namespace_connect_with_payload() {
        assert_eq!(decode(r#"40{"sid":"xyz"}"#).ok(), Some(Packet::Connect));
        assert_eq!(decode("41").ok(), Some(Packet::Disconnect));
    }

    #[test]
    fn decodes_event_with_string_payload() {
        let Ok(Packet::Event(frame)) = decode(r#"42["ack","{\"ok\":true}"]"#) else {
            panic!("expected event");
        };
        assert_eq!(frame.event, "ack");
        assert_eq!(frame.data, serde_json::json!("{\"ok\":true}"));
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        let Ok(Packet::Event(frame)) = decode(r#"42/bank,17["transfer",{"amount":5}]"#) else {
            panic!("expected event");
        };
        assert_eq!(frame.event, "transfer");
        assert_eq!(frame.data["amount"], 5);
    }

    #[test]
    fn event_without_data_is_null() {
        let Ok(Packet::Event(frame)) = decode(r#"42["err"]"#) else {
            panic!("expected event");
        };
        assert!(frame.data.is_null());
    }

    #[test]
    fn decodes_connect_error_message() {
        assert_eq!(
            decode(r#"44{"message":"Not authorized"}"#).ok(),
            Some(Packet::ConnectError("Not authorized".to_string()))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
        assert!(decode("42{not an array}").is_err());
        assert!(decode("42[5]").is_err());
    }

    #[test]
    fn encodes_event() {
        let frame = Frame::new("ping", serde_json::json!("{}"));
        assert_eq!(encode_event(&frame).ok().as_deref(), Some(r#"42["ping","{}"]"#));
    }

    #[test]
    fn endpoint_rewrites_https() {
        let Ok(url) = endpoint("https://localhost:8443") else {
            panic!("valid url");
        };
        assert_eq!(
            url.as_str(),
            "wss://localhost:8443/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn endpoint_keeps_custom_path() {
        let Ok(url) = endpoint("http://bank.test/rt/") else {
            panic!("valid url");
        };
        assert_eq!(url.as_str(), "ws://bank.test/rt/?EIO=4&transport=websocket");
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        assert!(matches!(endpoint("ftp://x"), Err(ClientError::Config(_))));
        assert!(matches!(endpoint("not a url"), Err(ClientError::Config(_))));
    }
}
