//! Inbound event router.
//!
//! Frames from the link are decoded into [`InboundEvent`]s, correlated with
//! in-flight commands, published on the event bus, and handed to the
//! handler registered for their kind. Unknown event names and kinds with
//! no handler are dropped with a warning.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::pending::PendingRequests;
use crate::domain::{ClientEvent, EventKind, InboundEvent};
use crate::protocol::{CommandKind, Frame};
use crate::ws::{ConnectionHandle, InboundSink};

/// Callback for one event kind.
pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Routes inbound events to per-kind handlers.
pub struct EventRouter {
    handlers: RwLock<HashMap<EventKind, EventHandler>>,
    pending: Arc<PendingRequests>,
    link: ConnectionHandle,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<EventKind> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        f.debug_struct("EventRouter")
            .field("handlers", &kinds)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Creates a router with no handlers.
    #[must_use]
    pub fn new(pending: Arc<PendingRequests>, link: ConnectionHandle) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            pending,
            link,
        }
    }

    /// Registers the handler for `kind`, replacing any previous one.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(handler));
    }

    /// Routes one decoded event.
    ///
    /// Returns `true` if a handler received it.
    pub fn dispatch(&self, event: &InboundEvent) -> bool {
        if let Some(resolved) = self.pending.resolve(event) {
            tracing::debug!(
                request_id = %resolved.request_id,
                command = %resolved.command,
                kind = %event.kind,
                "response correlated"
            );
            if resolved.command == CommandKind::Auth && event.kind == EventKind::Ack {
                self.link.mark_authenticated();
            }
        }

        let _ = self.link.event_bus().publish(ClientEvent::Inbound {
            event: event.clone(),
        });

        // Released before the call so a handler may register handlers.
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind)
            .map(Arc::clone);
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => {
                tracing::warn!(kind = %event.kind, "no handler registered, dropping event");
                false
            }
        }
    }
}

impl InboundSink for EventRouter {
    fn deliver(&self, frame: Frame) {
        let name = frame.event.clone();
        match InboundEvent::from_frame(frame) {
            Some(event) => {
                self.dispatch(&event);
            }
            None => tracing::warn!(event = %name, "unknown inbound event, dropping"),
        }
    }

    fn link_down(&self, reason: &str) {
        let failed = self.pending.fail_all(reason);
        if failed > 0 {
            tracing::warn!(failed, %reason, "failing in-flight requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionState, EventBus, RequestId};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn router() -> EventRouter {
        EventRouter::new(
            Arc::new(PendingRequests::new()),
            ConnectionHandle::new(EventBus::new(16)),
        )
    }

    fn counting(router: &EventRouter, kind: EventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        router.on(kind, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn err_reaches_only_the_err_handler() {
        let router = router();
        let acks = counting(&router, EventKind::Ack);
        let errs = counting(&router, EventKind::Err);
        let notes = counting(&router, EventKind::Notification);

        router.deliver(Frame::new("err", json!("{\"message\":\"nonce too old\"}")));

        assert_eq!(acks.load(Ordering::SeqCst), 0);
        assert_eq!(errs.load(Ordering::SeqCst), 1);
        assert_eq!(notes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unregistered_kind_is_dropped() {
        let router = router();
        let _acks = counting(&router, EventKind::Ack);
        let event = InboundEvent::new(EventKind::Notification, json!({}));
        assert!(!router.dispatch(&event));
    }

    #[test]
    fn unknown_event_name_reaches_no_handler() {
        let router = router();
        let acks = counting(&router, EventKind::Ack);
        router.deliver(Frame::new("balance", json!({})));
        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_sees_decoded_payload() {
        let router = router();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&seen);
        router.on(EventKind::Notification, move |event| {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(event.payload.clone());
        });
        router.deliver(Frame::new("transfer", json!("{\"amount\":5}")));
        let payload = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(payload, Some(json!({ "amount": 5 })));
    }

    #[test]
    fn handler_may_register_another_handler() {
        let router = Arc::new(router());
        let notes = Arc::new(AtomicUsize::new(0));
        {
            let inner = Arc::clone(&router);
            let notes = Arc::clone(&notes);
            router.on(EventKind::Ack, move |_| {
                let notes = Arc::clone(&notes);
                inner.on(EventKind::Notification, move |_| {
                    notes.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert!(router.dispatch(&InboundEvent::new(EventKind::Ack, json!({}))));
        assert!(router.dispatch(&InboundEvent::new(EventKind::Notification, json!({}))));
        assert_eq!(notes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auth_ack_advances_to_authenticated() {
        let pending = Arc::new(PendingRequests::new());
        let link = ConnectionHandle::new(EventBus::new(16));
        link.transition(ConnectionState::Connecting);
        link.transition(ConnectionState::Connected);
        let router = EventRouter::new(Arc::clone(&pending), link.clone());

        let ping = RequestId::new();
        let auth = RequestId::new();
        pending.register(ping, CommandKind::Ping, None);
        pending.register(auth, CommandKind::Auth, None);

        router.dispatch(&InboundEvent::new(
            EventKind::Ack,
            json!({ "requestId": ping.to_string() }),
        ));
        assert_eq!(link.state(), ConnectionState::Connected);

        router.dispatch(&InboundEvent::new(
            EventKind::Ack,
            json!({ "requestId": auth.to_string() }),
        ));
        assert_eq!(link.state(), ConnectionState::Authenticated);
    }

    #[test]
    fn auth_err_does_not_authenticate() {
        let pending = Arc::new(PendingRequests::new());
        let link = ConnectionHandle::new(EventBus::new(16));
        link.transition(ConnectionState::Connecting);
        link.transition(ConnectionState::Connected);
        let router = EventRouter::new(Arc::clone(&pending), link.clone());
        pending.register(RequestId::new(), CommandKind::Auth, None);

        router.dispatch(&InboundEvent::new(EventKind::Err, json!("bad signature")));
        assert_eq!(link.state(), ConnectionState::Connected);
        assert!(pending.is_empty());
    }
}
