//! Boundary to the underlying chat-network client.
//!
//! A [`ChatNetwork`] opens one client per account and hands back the client
//! together with the stream of lifecycle and message events it produces.

use std::sync::Arc;

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    wagate_common::{
        Result,
        types::{Credential, InboundMessage, OutboundMedia, PresenceAction, StructuredMessage},
    },
};

/// Events emitted by a network client, in the order the network produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A pairing challenge to be rendered as a QR code.
    Qr(String),
    /// Pairing confirmed; carries the resumable credential when the network
    /// provides one.
    Authenticated(Option<Credential>),
    /// The client finished loading and can send.
    Ready,
    /// Hard authentication rejection.
    AuthFailure(String),
    Message(InboundMessage),
    /// Connection loss. Nothing follows this event.
    Disconnected(String),
}

pub type EventStream = mpsc::Receiver<NetworkEvent>;

/// Send operations of one live client. Chat ids are already normalized.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    async fn send_media(&self, chat_id: &str, media: &OutboundMedia) -> Result<()>;

    async fn send_structured(&self, chat_id: &str, message: &StructuredMessage) -> Result<()>;

    async fn send_presence(&self, chat_id: &str, action: PresenceAction) -> Result<()>;

    /// Unlink the device on the network side.
    async fn logout(&self) -> Result<()>;

    /// Release the client. Pending sends fail.
    async fn close(&self);
}

/// Factory for per-account clients.
#[async_trait]
pub trait ChatNetwork: Send + Sync {
    /// Start the handshake for `account_id`, replaying `credential` if present.
    async fn open(
        &self,
        account_id: &str,
        credential: Option<Credential>,
    ) -> Result<(Arc<dyn ChatClient>, EventStream)>;
}
