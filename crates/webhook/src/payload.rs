//! JSON body posted to webhooks.

use {
    serde::Serialize,
    wagate_common::types::{InboundMessage, MediaAttachment},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub account_id: String,
    pub from: String,
    pub body: String,
    pub message_type: String,
    pub timestamp: i64,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<WebhookMedia>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMedia {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
    pub filename: String,
}

impl From<&MediaAttachment> for WebhookMedia {
    fn from(media: &MediaAttachment) -> Self {
        Self {
            mime_type: media.mime_type.clone(),
            data: media.to_base64(),
            filename: media.filename_or_default(),
        }
    }
}

impl From<InboundMessage> for WebhookPayload {
    fn from(msg: InboundMessage) -> Self {
        Self {
            media: msg.media.as_ref().map(WebhookMedia::from),
            account_id: msg.account_id,
            from: msg.sender_id,
            body: msg.body,
            message_type: msg.message_type,
            timestamp: msg.timestamp,
            is_group: msg.is_group,
        }
    }
}
