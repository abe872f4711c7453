//! Transport boundary.
//!
//! The connection manager never touches sockets directly. A [`Transport`]
//! opens one link at a time and hands back a [`TransportLink`]: an outbound
//! frame queue and an inbound signal stream. The transport reports
//! connect-success, inbound frames, liveness, and link loss as
//! [`TransportSignal`]s.

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::protocol::Frame;

/// Signals a transport reports for an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// The server accepted the connection; commands may flow.
    Connected,
    /// An event arrived from the server.
    Frame(Frame),
    /// Transport-level traffic proved the server alive (e.g. an Engine.IO
    /// ping); carries no event.
    Alive,
    /// The link is gone.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
}

/// The two halves of one open link.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames queued here are written to the server in order.
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Signals from the server side.
    pub inbound: mpsc::UnboundedReceiver<TransportSignal>,
}

/// A socket/event-emitter implementation the client can drive.
///
/// Dropping the [`TransportLink`] must close the underlying connection.
pub trait Transport: Send + Sync + 'static {
    /// Opens a new link. Returns once the link exists; the connect-success
    /// signal arrives later on [`TransportLink::inbound`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the link cannot be opened.
    fn connect(&self) -> impl Future<Output = Result<TransportLink, ClientError>> + Send;
}
