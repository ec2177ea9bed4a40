//! WhatsApp Web connections for the gateway.
//!
//! A [`Connection`] tracks one account's authentication state and gates its
//! sends. The chat network itself sits behind [`ChatNetwork`]; the production
//! implementation talks to a sidecar process over WebSocket.

pub mod connection;
pub mod jid;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod network;
pub mod qr;
pub mod sidecar;
pub mod types;

pub use {
    connection::{Connection, ConnectionState, Effect},
    network::{ChatClient, ChatNetwork, EventStream, NetworkEvent},
    qr::QrImage,
    sidecar::SidecarNetwork,
};
