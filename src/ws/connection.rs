//! Connection state machine.
//!
//! [`ConnectionManager`] owns the transport and a driver task that walks
//! the link through `Disconnected → Connecting → Connected →
//! Authenticated`. [`ConnectionHandle`] is the cheap, cloneable view of the
//! same connection that the dispatcher and router use to read the state,
//! transmit frames, and record authentication.
//!
//! The driver loop selects over cancellation, transport signals, and the
//! heartbeat-timeout deadline. Leaving Connected/Authenticated stops the
//! heartbeat task exactly once, detaches the outbound queue (unsent frames
//! are dropped), and notifies the inbound sink so waiting requests fail.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{Heartbeat, HeartbeatTask};
use super::reconnect::{NoReconnect, ReconnectPolicy};
use super::transport::{Transport, TransportLink, TransportSignal};
use crate::domain::{ClientEvent, ConnectionState, EventBus};
use crate::error::ClientError;
use crate::protocol::Frame;

/// Receives what arrives on the link.
pub trait InboundSink: Debug + Send + Sync + 'static {
    /// Handles one inbound frame.
    fn deliver(&self, frame: Frame);

    /// Called once whenever an established or pending link ends.
    fn link_down(&self, reason: &str);
}

/// Timing and retry settings for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Interval between PING commands while connected.
    pub heartbeat_interval: Duration,
    /// Drop the link if nothing arrives for this long; `None` disables.
    pub heartbeat_timeout: Option<Duration>,
    /// What to do after the link is lost.
    pub reconnect: Arc<dyn ReconnectPolicy>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Some(Duration::from_secs(90)),
            reconnect: Arc::new(NoReconnect),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    bus: EventBus,
}

/// Shared view of the connection used by the dispatcher and router.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Creates a handle in the Disconnected state.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                state,
                outbound: Mutex::new(None),
                bus,
            }),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Returns the bus state changes are published on.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Waits until the state equals `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if `timeout` elapses first.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let mut rx = self.shared.state.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Transport("state channel closed".to_string())),
            Err(_) => Err(ClientError::Transport(format!(
                "timed out waiting for state {target}"
            ))),
        }
    }

    /// Queues a frame on the live link.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] unless the state is Connected or
    /// Authenticated and the link accepts the frame.
    pub fn transmit(&self, frame: Frame) -> Result<(), ClientError> {
        let state = self.state();
        if !state.is_connected() {
            return Err(ClientError::Transport(format!("not connected ({state})")));
        }
        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = outbound.as_ref() else {
            return Err(ClientError::Transport("not connected".to_string()));
        };
        sender
            .send(frame)
            .map_err(|_| ClientError::Transport("link closed".to_string()))
    }

    /// Records a server ACK of AUTH. Returns `true` if the state advanced.
    pub fn mark_authenticated(&self) -> bool {
        self.transition(ConnectionState::Authenticated)
    }

    /// Moves to `next` if the transition is legal, publishing the change.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut from = None;
        self.shared.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        let Some(from) = from else {
            return false;
        };
        tracing::info!(%from, to = %next, "connection state changed");
        let _ = self.shared.bus.publish(ClientEvent::StateChanged {
            from,
            to: next,
            timestamp: Utc::now(),
        });
        true
    }

    pub(crate) fn attach(&self, sender: mpsc::UnboundedSender<Frame>) {
        *self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    pub(crate) fn detach(&self) {
        self.shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[derive(Debug)]
struct Session {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the transport and drives the connection lifecycle.
#[derive(Debug)]
pub struct ConnectionManager<T> {
    transport: Arc<T>,
    settings: ConnectionSettings,
    link: ConnectionHandle,
    sink: Arc<dyn InboundSink>,
    heartbeat: Arc<dyn Heartbeat>,
    session: Mutex<Option<Session>>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a manager. Nothing happens until [`ConnectionManager::open`].
    #[must_use]
    pub fn new(
        transport: T,
        settings: ConnectionSettings,
        link: ConnectionHandle,
        sink: Arc<dyn InboundSink>,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            settings,
            link,
            sink,
            heartbeat,
            session: Mutex::new(None),
        }
    }

    /// Returns the shared handle for this connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.link
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.subscribe_state()
    }

    /// Waits until the state equals `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if `timeout` elapses first.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.link.wait_for_state(target, timeout).await
    }

    /// Starts connecting: Disconnected → Connecting. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if a connection is already open
    /// or being opened.
    pub fn open(&self) -> Result<(), ClientError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return Err(ClientError::Transport("connection already open".to_string()));
        }
        if !self.link.transition(ConnectionState::Connecting) {
            return Err(ClientError::Transport(format!(
                "cannot open from state {}",
                self.link.state()
            )));
        }

        let token = CancellationToken::new();
        let driver = Driver {
            transport: Arc::clone(&self.transport),
            settings: self.settings.clone(),
            link: self.link.clone(),
            sink: Arc::clone(&self.sink),
            heartbeat: Arc::clone(&self.heartbeat),
            token: token.clone(),
        };
        let task = tokio::spawn(driver.run());
        *session = Some(Session { token, task });
        Ok(())
    }

    /// Closes the connection and waits for the driver to tear down.
    ///
    /// Cancels the heartbeat, drops unsent frames, and fails requests that
    /// are still waiting for a response. Idempotent.
    pub async fn close(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Session { token, task }) = session {
            token.cancel();
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "connection driver did not shut down cleanly");
            }
        }
        self.link.detach();
        self.link.transition(ConnectionState::Disconnected);
    }
}

enum LinkEnd {
    Closed,
    Lost {
        reason: String,
        reached_connected: bool,
    },
}

struct Driver<T> {
    transport: Arc<T>,
    settings: ConnectionSettings,
    link: ConnectionHandle,
    sink: Arc<dyn InboundSink>,
    heartbeat: Arc<dyn Heartbeat>,
    token: CancellationToken,
}

impl<T: Transport> Driver<T> {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            let opened = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                opened = self.transport.connect() => opened,
            };
            let end = match opened {
                Ok(link) => self.drive_link(link).await,
                Err(e) => LinkEnd::Lost {
                    reason: e.to_string(),
                    reached_connected: false,
                },
            };
            let LinkEnd::Lost {
                reason,
                reached_connected,
            } = end
            else {
                break;
            };

            tracing::warn!(%reason, "connection lost");
            self.sink.link_down(&reason);
            self.link.transition(ConnectionState::Disconnected);

            if reached_connected {
                attempt = 0;
            }
            attempt = attempt.saturating_add(1);
            let Some(delay) = self.settings.reconnect.next_delay(attempt) else {
                break;
            };
            tracing::info!(attempt, delay_ms = delay.as_millis(), "reconnecting");
            let _ = self.link.event_bus().publish(ClientEvent::Reconnecting {
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                timestamp: Utc::now(),
            });
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            if !self.link.transition(ConnectionState::Connecting) {
                break;
            }
        }

        self.link.detach();
        if self.token.is_cancelled() {
            self.sink.link_down("connection closed");
        }
        self.link.transition(ConnectionState::Disconnected);
        tracing::debug!("connection driver finished");
    }

    async fn drive_link(&self, link: TransportLink) -> LinkEnd {
        let TransportLink {
            outbound,
            mut inbound,
        } = link;
        let mut heartbeat: Option<HeartbeatTask> = None;
        let mut last_inbound = Instant::now();

        let end = loop {
            let watchdog = self.settings.heartbeat_timeout.filter(|_| heartbeat.is_some());
            let deadline = last_inbound + watchdog.unwrap_or_default();
            tokio::select! {
                biased;
                () = self.token.cancelled() => break LinkEnd::Closed,
                signal = inbound.recv() => match signal {
                    Some(TransportSignal::Connected) => {
                        last_inbound = Instant::now();
                        if heartbeat.is_none() {
                            self.link.attach(outbound.clone());
                            self.link.transition(ConnectionState::Connected);
                            heartbeat = Some(self.start_heartbeat());
                        }
                    }
                    Some(TransportSignal::Frame(frame)) => {
                        last_inbound = Instant::now();
                        self.sink.deliver(frame);
                    }
                    Some(TransportSignal::Alive) => last_inbound = Instant::now(),
                    Some(TransportSignal::Disconnected { reason }) => {
                        break LinkEnd::Lost { reason, reached_connected: heartbeat.is_some() };
                    }
                    None => {
                        break LinkEnd::Lost {
                            reason: "transport closed the link".to_string(),
                            reached_connected: heartbeat.is_some(),
                        };
                    }
                },
                () = tokio::time::sleep_until(deadline), if watchdog.is_some() => {
                    break LinkEnd::Lost {
                        reason: "heartbeat timeout".to_string(),
                        reached_connected: true,
                    };
                }
            }
        };

        if let Some(task) = heartbeat {
            task.stop().await;
            let _ = self.link.event_bus().publish(ClientEvent::HeartbeatStopped {
                timestamp: Utc::now(),
            });
        }
        self.link.detach();
        end
    }

    fn start_heartbeat(&self) -> HeartbeatTask {
        let interval = self.settings.heartbeat_interval;
        tracing::debug!(interval_ms = interval.as_millis(), "heartbeat started");
        let _ = self.link.event_bus().publish(ClientEvent::HeartbeatStarted {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        });
        HeartbeatTask::spawn(
            interval,
            Arc::clone(&self.heartbeat),
            self.token.child_token(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::ws::memory::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Recorder {
        frames: Mutex<Vec<Frame>>,
        downs: AtomicUsize,
    }

    impl InboundSink for Recorder {
        fn deliver(&self, frame: Frame) {
            self.frames
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(frame);
        }

        fn link_down(&self, _reason: &str) {
            self.downs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct PingOverLink(ConnectionHandle);

    impl Heartbeat for PingOverLink {
        fn beat(&self) -> Result<(), ClientError> {
            self.0.transmit(Frame::new("ping", serde_json::Value::Null))
        }
    }

    fn manager(
        settings: ConnectionSettings,
    ) -> (
        ConnectionManager<MemoryTransport>,
        crate::ws::memory::MemoryServer,
        Arc<Recorder>,
    ) {
        let (transport, server) = MemoryTransport::pair();
        let link = ConnectionHandle::new(EventBus::new(64));
        let recorder = Arc::new(Recorder::default());
        let heartbeat = Arc::new(PingOverLink(link.clone()));
        let manager = ConnectionManager::new(
            transport,
            settings,
            link,
            Arc::clone(&recorder) as Arc<dyn InboundSink>,
            heartbeat,
        );
        (manager, server, recorder)
    }

    #[test]
    fn transmit_requires_connection() {
        let link = ConnectionHandle::new(EventBus::new(4));
        assert!(matches!(
            link.transmit(Frame::new("ping", serde_json::Value::Null)),
            Err(ClientError::Transport(_))
        ));
    }

    #[test]
    fn illegal_transitions_are_ignored() {
        let link = ConnectionHandle::new(EventBus::new(4));
        assert!(!link.mark_authenticated());
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn open_connect_and_route_frames() {
        let (manager, mut server, recorder) = manager(ConnectionSettings::default());
        let Ok(()) = manager.open() else {
            panic!("open should succeed");
        };
        assert_eq!(manager.handle().state(), ConnectionState::Connecting);
        assert!(manager.open().is_err());

        let Some(peer) = server.accept().await else {
            panic!("link expected");
        };
        peer.accept_connection();
        let Ok(()) = manager
            .handle()
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(1))
            .await
        else {
            panic!("should reach connected");
        };

        peer.emit("ack", serde_json::json!({ "ok": true }));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        let frames = recorder
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        assert_eq!(frames, 1);

        manager.close().await;
        assert_eq!(manager.handle().state(), ConnectionState::Disconnected);
        assert_eq!(recorder.downs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_drops_silent_link() {
        let settings = ConnectionSettings {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Some(Duration::from_secs(45)),
            reconnect: Arc::new(NoReconnect),
        };
        let (manager, mut server, _) = manager(settings);
        let mut states = manager.handle().subscribe_state();
        let Ok(()) = manager.open() else {
            panic!("open should succeed");
        };
        let Some(peer) = server.accept().await else {
            panic!("link expected");
        };
        peer.accept_connection();

        let start = Instant::now();
        let Ok(_) = states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
        else {
            panic!("should connect");
        };
        let Ok(_) = states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
        else {
            panic!("should time out");
        };
        assert!(start.elapsed() >= Duration::from_secs(45));
        drop(peer);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_liveness_keeps_idle_link_up() {
        let settings = ConnectionSettings {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Some(Duration::from_secs(45)),
            reconnect: Arc::new(NoReconnect),
        };
        let (manager, mut server, recorder) = manager(settings);
        let Ok(()) = manager.open() else {
            panic!("open should succeed");
        };
        let Some(peer) = server.accept().await else {
            panic!("link expected");
        };
        peer.accept_connection();
        let Ok(()) = manager
            .handle()
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(1))
            .await
        else {
            panic!("should reach connected");
        };

        // Engine.IO pings every 25 s, no events at all.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_secs(25)).await;
            peer.keep_alive();
        }
        tokio::task::yield_now().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(recorder.downs.load(Ordering::SeqCst), 0);
        assert!(
            recorder
                .frames
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
        );

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_policy_after_refusal() {
        let settings = ConnectionSettings {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: None,
            reconnect: Arc::new(crate::ws::ExponentialBackoff::new(
                Duration::from_secs(1),
                Duration::from_secs(8),
                5,
            )),
        };
        let (manager, mut server, _) = manager(settings);
        server.refuse_next(2);
        let Ok(()) = manager.open() else {
            panic!("open should succeed");
        };

        let start = Instant::now();
        let Some(peer) = server.accept().await else {
            panic!("third attempt should reach the server");
        };
        // 1 s + 2 s of backoff before the third attempt.
        assert!(start.elapsed() >= Duration::from_secs(3));
        peer.accept_connection();
        let Ok(()) = manager
            .handle()
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(1))
            .await
        else {
            panic!("should reach connected");
        };
        manager.close().await;
    }
}
