//! Domain layer: identifiers, connection states, events, and the event bus.
//!
//! This module contains the client-side domain model: request identity
//! for correlation, the connection state enum, inbound server events, and
//! the broadcast bus that surfaces all of them to observers.

pub mod client_event;
pub mod connection_state;
pub mod event_bus;
pub mod inbound;
pub mod request_id;

pub use client_event::ClientEvent;
pub use connection_state::ConnectionState;
pub use event_bus::EventBus;
pub use inbound::{EventKind, InboundEvent};
pub use request_id::RequestId;
