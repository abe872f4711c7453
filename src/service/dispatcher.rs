//! Command dispatcher: validate, stamp, sign, emit.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;

use super::pending::PendingRequests;
use crate::domain::{ClientEvent, RequestId};
use crate::error::ClientError;
use crate::protocol::{CommandKind, CommandParams, EnvelopeSealer, Fields, NonceClock};
use crate::ws::{ConnectionHandle, Heartbeat};

/// Dispatch behaviour knobs.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Attach a `requestId` to every envelope.
    pub attach_request_id: bool,
    /// How long [`CommandDispatcher::request`] waits for ACK or ERR.
    pub request_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            attach_request_id: true,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Builds, signs, and emits command envelopes.
///
/// Every emission follows the same path: validate → acquire the nonce lock
/// → next nonce → canonicalize and sign → enqueue on the link → register
/// as pending → publish `CommandSent`. Validation failures touch neither
/// the nonce clock nor the link.
#[derive(Debug)]
pub struct CommandDispatcher {
    sealer: EnvelopeSealer,
    nonces: Mutex<NonceClock>,
    link: ConnectionHandle,
    pending: Arc<PendingRequests>,
    options: DispatchOptions,
}

impl CommandDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        sealer: EnvelopeSealer,
        nonces: NonceClock,
        link: ConnectionHandle,
        pending: Arc<PendingRequests>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            sealer,
            nonces: Mutex::new(nonces),
            link,
            pending,
            options,
        }
    }

    /// Sends a command described as a field map. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParams`] if `fields` do not fit `kind`,
    /// or any error from [`CommandDispatcher::send_command`].
    pub fn send(&self, kind: CommandKind, fields: &Fields) -> Result<RequestId, ClientError> {
        let params = CommandParams::from_fields(kind, fields)?;
        self.emit(&params, None)
    }

    /// Sends a typed command. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParams`] before any side effect,
    /// [`ClientError::Signing`] if signing fails, and
    /// [`ClientError::Transport`] if the link is not up.
    pub fn send_command(&self, params: &CommandParams) -> Result<RequestId, ClientError> {
        self.emit(params, None)
    }

    /// Sends a typed command and waits for its correlated response.
    ///
    /// # Errors
    ///
    /// Everything [`CommandDispatcher::send_command`] returns, plus the
    /// classified server error for an ERR, [`ClientError::Timeout`] if
    /// nothing arrives in time, and [`ClientError::Transport`] if the link
    /// goes down first.
    pub async fn request(&self, params: &CommandParams) -> Result<serde_json::Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        let request_id = self.emit(params, Some(tx))?;
        let timeout = self.options.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Transport(
                "request dropped before completion".to_string(),
            )),
            Err(_) => {
                self.pending.forget(request_id);
                tracing::warn!(%request_id, command = %params.kind(), "request timed out");
                Err(ClientError::Timeout {
                    request_id,
                    elapsed: timeout,
                })
            }
        }
    }

    /// Most recently issued nonce, if any.
    #[must_use]
    pub fn last_nonce(&self) -> Option<u64> {
        self.nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
    }

    /// The in-flight command map.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    fn emit(
        &self,
        params: &CommandParams,
        responder: Option<super::pending::Responder>,
    ) -> Result<RequestId, ClientError> {
        params.validate()?;
        let kind = params.kind();
        let request_id = RequestId::new();
        let attached = self.options.attach_request_id.then_some(request_id);

        let nonce = {
            // Held across signing and enqueueing: wire order is nonce order.
            let mut nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
            let nonce = nonces.next();
            let envelope = self.sealer.seal(params, nonce, attached)?;
            let frame = envelope.to_frame(kind.event_name())?;
            self.pending.register(request_id, kind, responder);
            if let Err(e) = self.link.transmit(frame) {
                self.pending.forget(request_id);
                return Err(e);
            }
            nonce
        };

        tracing::debug!(%request_id, command = %kind, nonce, "command sent");
        let _ = self.link.event_bus().publish(ClientEvent::CommandSent {
            request_id,
            command: kind,
            nonce,
            timestamp: Utc::now(),
        });
        Ok(request_id)
    }
}

impl Heartbeat for CommandDispatcher {
    fn beat(&self) -> Result<(), ClientError> {
        self.send_command(&CommandParams::Ping).map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::crypto::KeyManager;
    use crate::domain::{ConnectionState, EventBus};
    use crate::protocol::{Envelope, TransferParams};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn dispatcher(start: u64) -> (CommandDispatcher, mpsc::UnboundedReceiver<crate::protocol::Frame>) {
        let Ok(keys) = KeyManager::generate() else {
            panic!("key generation should succeed");
        };
        let Ok(sealer) = EnvelopeSealer::new(Arc::new(keys), 2) else {
            panic!("version 2 is supported");
        };
        let link = ConnectionHandle::new(EventBus::new(16));
        let (tx, rx) = mpsc::unbounded_channel();
        link.transition(ConnectionState::Connecting);
        link.attach(tx);
        link.transition(ConnectionState::Connected);
        let dispatcher = CommandDispatcher::new(
            sealer,
            NonceClock::counter(start),
            link,
            Arc::new(PendingRequests::new()),
            DispatchOptions::default(),
        );
        (dispatcher, rx)
    }

    fn decode(frame: &crate::protocol::Frame) -> Envelope {
        let Ok(envelope) = Envelope::from_frame_data(&frame.data) else {
            panic!("frame should carry an envelope");
        };
        envelope
    }

    #[test]
    fn invalid_fields_consume_no_nonce_and_send_nothing() {
        let (dispatcher, mut rx) = dispatcher(2000);
        let mut fields = Fields::new();
        fields.insert("accountNumber".into(), "9120000001".into());
        fields.insert("beneficiary".into(), "9120000002".into());
        fields.insert("amount".into(), serde_json::json!(1.0));
        fields.insert("narrative".into(), "Testing".into());

        let result = dispatcher.send(CommandKind::Transfer, &fields);
        assert!(matches!(result, Err(ClientError::InvalidParams(_))));
        assert_eq!(dispatcher.last_nonce(), Some(1999));
        assert!(rx.try_recv().is_err());
        assert!(dispatcher.pending().is_empty());
    }

    #[test]
    fn wire_order_follows_nonce_order() {
        let (dispatcher, mut rx) = dispatcher(10);
        for _ in 0..5 {
            assert!(dispatcher.beat().is_ok());
        }
        let nonces: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| decode(&frame).nonce)
            .collect();
        assert_eq!(nonces, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn transfer_envelope_carries_request_id_and_params() {
        let (dispatcher, mut rx) = dispatcher(2000);
        let params = CommandParams::Transfer(TransferParams {
            account_number: "9120000001".to_string(),
            beneficiary: "9120000002".to_string(),
            currency: "USD".to_string(),
            amount: dec!(1.00),
            narrative: "Testing".to_string(),
        });
        let Ok(id) = dispatcher.send_command(&params) else {
            panic!("send should succeed");
        };
        let Ok(frame) = rx.try_recv() else {
            panic!("frame expected");
        };
        assert_eq!(frame.event, "transfer");
        let envelope = decode(&frame);
        assert_eq!(envelope.nonce, 2000);
        assert_eq!(envelope.request_id, Some(id));
        assert_eq!(dispatcher.pending().len(), 1);
    }

    #[test]
    fn disconnected_link_rejects_without_pending_entry() {
        let (dispatcher, _rx) = dispatcher(1);
        dispatcher.link.detach();
        dispatcher.link.transition(ConnectionState::Disconnected);
        assert!(matches!(
            dispatcher.send_command(&CommandParams::Auth),
            Err(ClientError::Transport(_))
        ));
        assert!(dispatcher.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_without_response() {
        let (dispatcher, _rx) = dispatcher(1);
        let result = dispatcher.request(&CommandParams::Auth).await;
        let Err(ClientError::Timeout { elapsed, .. }) = result else {
            panic!("expected timeout, got {result:?}");
        };
        assert_eq!(elapsed, Duration::from_secs(10));
        assert!(dispatcher.pending().is_empty());
    }
}
