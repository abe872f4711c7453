//! Connection layer: transports, the connection state machine, heartbeat,
//! and reconnection.
//!
//! [`ConnectionManager`] drives one logical connection over any
//! [`Transport`]. [`SocketIoTransport`] talks to a real server;
//! [`MemoryTransport`] stands in for it in tests and offline runs.

pub mod connection;
pub mod heartbeat;
pub mod memory;
pub mod reconnect;
pub mod socketio;
pub mod transport;
pub mod websocket;

pub use connection::{ConnectionHandle, ConnectionManager, ConnectionSettings, InboundSink};
pub use heartbeat::{Heartbeat, HeartbeatTask};
pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use reconnect::{ExponentialBackoff, NoReconnect, ReconnectPolicy};
pub use transport::{Transport, TransportLink, TransportSignal};
pub use websocket::SocketIoTransport;
