//! Protocol layer: commands, canonical strings, nonces, and envelopes.
//!
//! Everything in this module is pure or locally owned; no I/O happens
//! here. The wire contract with the server (canonical field order, number
//! formatting, envelope shape) lives entirely in this module.

pub mod canonical;
pub mod command;
pub mod envelope;
pub mod nonce;

pub use canonical::{CanonicalScheme, format_amount};
pub use command::{CommandKind, CommandParams, Fields, StatementParams, TransferParams};
pub use envelope::{Envelope, EnvelopeSealer, Frame};
pub use nonce::{NonceClock, NonceSource};
