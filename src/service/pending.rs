//! In-flight command tracking.
//!
//! Every emitted command is registered here. An inbound ACK or ERR is
//! matched by the `requestId` the server echoes back; when the server omits
//! it, the oldest in-flight command is assumed (the server answers in
//! order).
//!
//! Heartbeat PINGs nobody waits on are matched by id only, never by age:
//! servers are not required to acknowledge them. Entries without a waiter
//! expire after a fixed time, and the queue is capped at
//! [`MAX_PENDING`] entries.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{EventKind, InboundEvent, RequestId};
use crate::error::ClientError;
use crate::protocol::CommandKind;

/// Receives the outcome of one request.
pub type Responder = oneshot::Sender<Result<serde_json::Value, ClientError>>;

/// Upper bound on tracked commands; the oldest is evicted beyond it.
pub const MAX_PENDING: usize = 1024;

const DEFAULT_EXPIRY: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct Entry {
    id: RequestId,
    kind: CommandKind,
    responder: Option<Responder>,
    registered_at: Instant,
}

impl Entry {
    /// Whether an ACK without `requestId` may be attributed to this entry.
    fn matches_by_age(&self) -> bool {
        self.responder.is_some() || self.kind != CommandKind::Ping
    }
}

/// A command matched to an inbound ACK or ERR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// Id of the matched command.
    pub request_id: RequestId,
    /// Type of the matched command.
    pub command: CommandKind,
}

/// Commands awaiting an ACK or ERR, oldest first.
#[derive(Debug)]
pub struct PendingRequests {
    entries: Mutex<VecDeque<Entry>>,
    expiry: Duration,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::with_expiry(DEFAULT_EXPIRY)
    }
}

impl PendingRequests {
    /// Creates an empty map whose unawaited entries expire after 10 s.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map whose unawaited entries expire after `expiry`.
    /// Entries with a responder are removed by their requester instead.
    #[must_use]
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            expiry,
        }
    }

    /// Records an emitted command. `responder`, if given, receives the
    /// correlated outcome.
    pub fn register(&self, id: RequestId, kind: CommandKind, responder: Option<Responder>) {
        let now = Instant::now();
        let mut entries = self.lock();
        self.prune(&mut entries, now);
        while entries.len() >= MAX_PENDING {
            let Some(evicted) = entries.pop_front() else {
                break;
            };
            tracing::warn!(
                request_id = %evicted.id,
                command = %evicted.kind,
                "pending queue full, evicting oldest"
            );
            if let Some(responder) = evicted.responder {
                let _ = responder.send(Err(ClientError::Transport(
                    "evicted from a full pending queue".to_string(),
                )));
            }
        }
        entries.push_back(Entry {
            id,
            kind,
            responder,
            registered_at: now,
        });
    }

    /// Matches an ACK or ERR to an in-flight command and completes its
    /// responder. Returns `None` for notifications and for responses nothing
    /// is waiting on.
    pub fn resolve(&self, event: &InboundEvent) -> Option<Resolved> {
        let outcome = match event.kind {
            EventKind::Ack => Ok(event.payload.clone()),
            EventKind::Err => Err(ClientError::from_server_payload(&event.payload)),
            EventKind::Notification => return None,
        };

        let entry = {
            let mut entries = self.lock();
            self.prune(&mut entries, Instant::now());
            let position = match event.request_id() {
                Some(id) => entries.iter().position(|e| e.id == id)?,
                None => entries.iter().position(Entry::matches_by_age)?,
            };
            entries.remove(position)?
        };

        if let Some(responder) = entry.responder {
            // The requester may have timed out and gone away.
            let _ = responder.send(outcome);
        }
        Some(Resolved {
            request_id: entry.id,
            command: entry.kind,
        })
    }

    /// Drops a command without completing it. Returns `true` if it was
    /// still pending.
    pub fn forget(&self, id: RequestId) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|e| e.id == id) {
            Some(position) => entries.remove(position).is_some(),
            None => false,
        }
    }

    /// Fails every pending command with [`ClientError::Transport`].
    /// Returns how many were pending.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<Entry> = self.lock().drain(..).collect();
        let count = drained.len();
        for entry in drained {
            if let Some(responder) = entry.responder {
                let _ = responder.send(Err(ClientError::Transport(reason.to_string())));
            }
        }
        count
    }

    /// Number of commands awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut entries = self.lock();
        self.prune(&mut entries, Instant::now());
        entries.len()
    }

    /// Returns `true` if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops unawaited entries older than the expiry.
    fn prune(&self, entries: &mut VecDeque<Entry>, now: Instant) {
        entries.retain(|e| {
            e.responder.is_some() || now.saturating_duration_since(e.registered_at) < self.expiry
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
