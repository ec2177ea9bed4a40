//! Wire frames exchanged with the chat sidecar.
//!
//! One WebSocket carries one account. Frames are JSON objects tagged by `type`.

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
    wagate_common::types::{
        Button, Credential, InboundMessage, ListSection, MediaAttachment, PresenceAction,
    },
};

use crate::{jid, network::NetworkEvent};

/// Frames sent from the gateway to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Login {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        credential: Option<Credential>,
    },
    Logout {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendText {
        to: String,
        text: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendMedia {
        to: String,
        mimetype: String,
        /// Base64 payload.
        data: String,
        filename: String,
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendButtons {
        to: String,
        body: String,
        buttons: Vec<Button>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendList {
        to: String,
        body: String,
        #[serde(rename = "buttonText")]
        button_text: String,
        sections: Vec<ListSection>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendPresence {
        to: String,
        action: PresenceAction,
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

impl GatewayMessage {
    /// Correlation id awaited in a `send_result`, if the frame expects one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Login { .. } => None,
            Self::Logout { request_id }
            | Self::SendText { request_id, .. }
            | Self::SendMedia { request_id, .. }
            | Self::SendButtons { request_id, .. }
            | Self::SendList { request_id, .. }
            | Self::SendPresence { request_id, .. } => Some(request_id),
        }
    }
}

/// Media carried by an inbound `message` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMedia {
    pub mimetype: String,
    pub data: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Frames received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        qr: String,
    },
    Authenticated {
        #[serde(default)]
        credential: Option<Credential>,
    },
    Ready {
        #[serde(rename = "phoneNumber", default)]
        phone_number: Option<String>,
    },
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Message {
        #[serde(rename = "messageId", default)]
        message_id: Option<String>,
        from: String,
        #[serde(rename = "chatId", default)]
        chat_id: Option<String>,
        #[serde(default)]
        body: String,
        #[serde(rename = "messageType", default = "default_message_type")]
        message_type: String,
        #[serde(default)]
        timestamp: f64,
        #[serde(rename = "isGroup", default)]
        is_group: Option<bool>,
        #[serde(default)]
        media: Option<WireMedia>,
    },
    SendResult {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        error: String,
    },
}

fn default_message_type() -> String {
    "chat".into()
}

impl SidecarMessage {
    /// Translate a lifecycle or message frame into a [`NetworkEvent`].
    ///
    /// `send_result` and `error` frames are not events and yield `None`.
    pub fn into_event(self, account_id: &str) -> Option<NetworkEvent> {
        match self {
            Self::Qr { qr } => Some(NetworkEvent::Qr(qr)),
            Self::Authenticated { credential } => Some(NetworkEvent::Authenticated(credential)),
            Self::Ready { .. } => Some(NetworkEvent::Ready),
            Self::AuthFailure { reason } => Some(NetworkEvent::AuthFailure(reason)),
            Self::Disconnected { reason } => Some(NetworkEvent::Disconnected(reason)),
            Self::Message {
                message_id: _,
                from,
                chat_id,
                body,
                message_type,
                timestamp,
                is_group,
                media,
            } => {
                let chat_id = chat_id.unwrap_or_else(|| from.clone());
                let media = media.and_then(|m| {
                    MediaAttachment::from_base64(m.mimetype, &m.data, m.filename)
                        .inspect_err(|e| {
                            warn!(account_id, from, error = %e, "dropping undecodable inbound media");
                        })
                        .ok()
                });
                Some(NetworkEvent::Message(InboundMessage {
                    account_id: account_id.to_string(),
                    is_group: is_group.unwrap_or_else(|| jid::is_group(&chat_id)),
                    sender_id: from,
                    chat_id,
                    body,
                    message_type,
                    timestamp: timestamp as i64,
                    media,
                }))
            },
            Self::SendResult { .. } | Self::Error { .. } => None,
        }
    }
}
