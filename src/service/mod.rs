//! Service layer: command dispatch, response correlation, event routing.
//!
//! [`CommandDispatcher`] signs and emits commands, [`PendingRequests`]
//! tracks them until the server answers, and [`EventRouter`] turns inbound
//! frames into handler calls and bus events.

pub mod dispatcher;
pub mod pending;
pub mod router;

pub use dispatcher::{CommandDispatcher, DispatchOptions};
pub use pending::{PendingRequests, Resolved, Responder};
pub use router::{EventHandler, EventRouter};
