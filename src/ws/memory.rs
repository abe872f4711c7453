//! In-memory transport.
//!
//! [`MemoryTransport`] hands every link it opens to a paired
//! [`MemoryServer`], which plays the server role: it accepts links, signals
//! connect-success, reads the client's frames, pushes events, and drops
//! links. Used by the test suite and for offline runs of the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use super::transport::{Transport, TransportLink, TransportSignal};
use crate::error::ClientError;
use crate::protocol::Frame;

/// Client half of an in-memory transport pair.
#[derive(Debug)]
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
}

/// Server half of an in-memory transport pair.
#[derive(Debug)]
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
    refusals: Arc<AtomicUsize>,
}

/// Server-side view of one open link.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<TransportSignal>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryTransport {
    /// Creates a connected transport/server pair.
    #[must_use]
    pub fn pair() -> (Self, MemoryServer) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let refusals = Arc::new(AtomicUsize::new(0));
        (
            Self {
                accepted,
                refusals: Arc::clone(&refusals),
            },
            MemoryServer { incoming, refusals },
        )
    }
}

impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<TransportLink, ClientError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::Transport("connection refused".to_string()));
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        self.accepted
            .send(MemoryPeer {
                to_client,
                from_client,
            })
            .map_err(|_| ClientError::Transport("memory server is gone".to_string()))?;
        Ok(TransportLink { outbound, inbound })
    }
}

impl MemoryServer {
    /// Waits for the client to open a link. `None` once the client side is
    /// dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// Makes the next `n` connection attempts fail.
    pub fn refuse_next(&self, n: usize) {
        self.refusals.store(n, Ordering::SeqCst);
    }
}

impl MemoryPeer {
    /// Sends the connect-success signal.
    pub fn accept_connection(&self) {
        let _ = self.to_client.send(TransportSignal::Connected);
    }

    /// Pushes an event to the client.
    pub fn emit(&self, event: &str, data: serde_json::Value) {
        let _ = self
            .to_client
            .send(TransportSignal::Frame(Frame::new(event, data)));
    }

    /// Signals transport-level liveness, as an Engine.IO ping would.
    pub fn keep_alive(&self) {
        let _ = self.to_client.send(TransportSignal::Alive);
    }

    /// Drops the link with the given reason.
    pub fn disconnect(self, reason: &str) {
        let _ = self.to_client.send(TransportSignal::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Waits for the next frame the client wrote. `None` once the client
    /// side of the link is closed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Returns a frame the client already wrote, without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_carries_frames_both_ways() {
        let (transport, mut server) = MemoryTransport::pair();
        let Ok(mut link) = transport.connect().await else {
            panic!("connect should succeed");
        };
        let Some(mut peer) = server.accept().await else {
            panic!("server should see the link");
        };

        peer.accept_connection();
        assert_eq!(link.inbound.recv().await, Some(TransportSignal::Connected));

        let _ = link.outbound.send(Frame::new("ping", serde_json::Value::Null));
        let Some(frame) = peer.next_frame().await else {
            panic!("frame should arrive");
        };
        assert_eq!(frame.event, "ping");
    }

    #[tokio::test]
    async fn refusals_are_consumed() {
        let (transport, server) = MemoryTransport::pair();
        server.refuse_next(1);
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
    }
}
