//! Registry of live per-account sessions.
//!
//! The registry is the only owner of sessions: it creates them on demand,
//! supervises each connection's event stream on its own task, relays inbound
//! messages to the session's webhook queue and removes the session once its
//! connection is gone.

pub mod registry;
pub mod session;

pub use {
    registry::SessionRegistry,
    session::{Session, SessionSummary},
};
