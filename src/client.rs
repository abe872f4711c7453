//! Client facade wiring identity, dispatch, routing, and the connection.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::ClientConfig;
use crate::crypto::KeyManager;
use crate::domain::{ClientEvent, ConnectionState, EventBus, EventKind, InboundEvent, RequestId};
use crate::error::ClientError;
use crate::protocol::{
    CommandKind, CommandParams, EnvelopeSealer, Fields, NonceClock, StatementParams,
    TransferParams,
};
use crate::service::{CommandDispatcher, EventRouter, PendingRequests};
use crate::ws::{
    ConnectionHandle, ConnectionManager, Heartbeat, InboundSink, SocketIoTransport, Transport,
};

/// One authenticated session with the banking server.
///
/// Built once from a [`ClientConfig`], a shared [`KeyManager`], and a
/// [`Transport`]. Nothing touches the network until [`BankwireClient::open`].
///
/// With `authenticate_on_connect` set, AUTH goes out each time the link
/// reaches Connected, so a reconnected link is authenticated again.
#[derive(Debug)]
pub struct BankwireClient<T> {
    keys: Arc<KeyManager>,
    dispatcher: Arc<CommandDispatcher>,
    router: Arc<EventRouter>,
    connection: ConnectionManager<T>,
    bus: EventBus,
    authenticate_on_connect: bool,
    auto_auth: Mutex<Option<DropGuard>>,
}

impl BankwireClient<SocketIoTransport> {
    /// Builds a client that reaches `config.server_url` over Socket.IO.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for an unusable server address and
    /// [`ClientError::UnsupportedApiVersion`] for an unknown `apiVersion`.
    pub fn connect_to(config: &ClientConfig, keys: Arc<KeyManager>) -> Result<Self, ClientError> {
        let transport = SocketIoTransport::new(&config.server_url)?;
        Self::new(config, keys, transport)
    }
}

impl<T: Transport> BankwireClient<T> {
    /// Builds a client over `transport` with the configured nonce source.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnsupportedApiVersion`] for an unknown
    /// `apiVersion`.
    pub fn new(
        config: &ClientConfig,
        keys: Arc<KeyManager>,
        transport: T,
    ) -> Result<Self, ClientError> {
        let nonces = NonceClock::from_source(config.nonce_source);
        Self::with_nonce_clock(config, keys, transport, nonces)
    }

    /// Builds a client with an explicit nonce clock.
    ///
    /// # Errors
    ///
    /// See [`BankwireClient::new`].
    pub fn with_nonce_clock(
        config: &ClientConfig,
        keys: Arc<KeyManager>,
        transport: T,
        nonces: NonceClock,
    ) -> Result<Self, ClientError> {
        let sealer = EnvelopeSealer::new(Arc::clone(&keys), config.api_version)?;
        let bus = EventBus::new(config.event_bus_capacity);
        let link = ConnectionHandle::new(bus.clone());
        let pending = Arc::new(PendingRequests::with_expiry(config.request_timeout));

        let dispatcher = Arc::new(CommandDispatcher::new(
            sealer,
            nonces,
            link.clone(),
            Arc::clone(&pending),
            config.dispatch_options(),
        ));
        let router = Arc::new(EventRouter::new(pending, link.clone()));
        let connection = ConnectionManager::new(
            transport,
            config.connection_settings(),
            link,
            Arc::clone(&router) as Arc<dyn InboundSink>,
            Arc::clone(&dispatcher) as Arc<dyn Heartbeat>,
        );

        Ok(Self {
            keys,
            dispatcher,
            router,
            connection,
            bus,
            authenticate_on_connect: config.authenticate_on_connect,
            auto_auth: Mutex::new(None),
        })
    }

    /// Base64 public key the server identifies this client by.
    #[must_use]
    pub fn public_key_base64(&self) -> &str {
        self.keys.public_key_base64()
    }

    /// Starts connecting. See [`ConnectionManager::open`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if already open.
    pub fn open(&self) -> Result<(), ClientError> {
        let states = self.connection.subscribe_state();
        self.connection.open()?;
        if self.authenticate_on_connect {
            let token = CancellationToken::new();
            tokio::spawn(authenticate_on_connect(
                Arc::clone(&self.dispatcher),
                states,
                token.clone(),
            ));
            // Replacing a previous guard cancels its task.
            *self.auto_auth.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(token.drop_guard());
        }
        Ok(())
    }

    /// Closes the connection. See [`ConnectionManager::close`].
    pub async fn close(&self) {
        drop(
            self.auto_auth
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        self.connection.close().await;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Observes connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Waits until the connection reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if `timeout` elapses first.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.connection.wait_for_state(target, timeout).await
    }

    /// Registers the handler for one inbound event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.router.on(kind, handler);
    }

    /// Subscribes to lifecycle and traffic events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }

    /// Sends a command described as a field map.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send`].
    pub fn send(&self, kind: CommandKind, fields: &Fields) -> Result<RequestId, ClientError> {
        self.dispatcher.send(kind, fields)
    }

    /// Sends a typed command.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send_command`].
    pub fn send_command(&self, params: &CommandParams) -> Result<RequestId, ClientError> {
        self.dispatcher.send_command(params)
    }

    /// Sends a typed command and waits for the correlated response.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::request`].
    pub async fn request(&self, params: &CommandParams) -> Result<serde_json::Value, ClientError> {
        self.dispatcher.request(params).await
    }

    /// Sends AUTH and waits for the server's answer. An ACK moves the
    /// connection to Authenticated.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::request`].
    pub async fn authenticate(&self) -> Result<serde_json::Value, ClientError> {
        self.request(&CommandParams::Auth).await
    }

    /// Sends a TRANSFER.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send_command`].
    pub fn transfer(&self, params: TransferParams) -> Result<RequestId, ClientError> {
        self.send_command(&CommandParams::Transfer(params))
    }

    /// Sends a STATEMENT request.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send_command`].
    pub fn statement(&self, params: StatementParams) -> Result<RequestId, ClientError> {
        self.send_command(&CommandParams::Statement(params))
    }

    /// The dispatcher behind this client.
    #[must_use]
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }
}

/// Sends AUTH whenever the link enters Connected until `token` fires.
async fn authenticate_on_connect(
    dispatcher: Arc<CommandDispatcher>,
    mut states: watch::Receiver<ConnectionState>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                if *states.borrow_and_update() != ConnectionState::Connected {
                    continue;
                }
                match dispatcher.send_command(&CommandParams::Auth) {
                    Ok(request_id) => tracing::info!(%request_id, "sent AUTH for new link"),
                    Err(e) => tracing::warn!(error = %e, "could not send AUTH for new link"),
                }
            }
        }
    }
    tracing::debug!("auto-authentication stopped");
}
