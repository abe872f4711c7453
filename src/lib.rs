//! # bankwire-client
//!
//! Client-side protocol engine for a banking API reached over a persistent
//! Socket.IO channel. Every outbound command (AUTH, TRANSFER, STATEMENT,
//! PING) is stamped with a strictly increasing nonce, canonicalized, and
//! signed with ECDSA over secp256k1. Acknowledgements, errors, and pushed
//! transfer notifications are correlated and routed back to the caller.
//!
//! ## Architecture
//!
//! ```text
//! BankwireClient (client.rs)
//!     │
//!     ├── CommandDispatcher (service/) ── NonceClock, EnvelopeSealer (protocol/)
//!     │                                        └── KeyManager, Signer (crypto/)
//!     ├── EventRouter (service/) ── PendingRequests (service/)
//!     ├── EventBus (domain/)
//!     │
//!     └── ConnectionManager (ws/)
//!             ├── HeartbeatTask, ReconnectPolicy
//!             └── Transport: SocketIoTransport | MemoryTransport
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod service;
pub mod ws;

pub use client::BankwireClient;
pub use config::ClientConfig;
pub use error::ClientError;
