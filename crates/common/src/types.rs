//! Domain types shared between the connection, registry, dispatcher and API.

use std::{fmt, str::FromStr};

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

use crate::error::{Error, Result};

/// Opaque resumable credential produced by the network's auth handshake.
///
/// Never inspected by the gateway: only stored and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(serde_json::Value);

impl Credential {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Authentication state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Uninitialized,
    AwaitingScan,
    Authenticated,
    AuthFailed,
    Disconnected,
}

impl AuthState {
    /// Terminal states are never left by the same connection.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AuthFailed | Self::Disconnected)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingScan => "awaiting_scan",
            Self::Authenticated => "authenticated",
            Self::AuthFailed => "auth_failed",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Media attached to an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub data: Bytes,
    pub filename: Option<String>,
}

impl MediaAttachment {
    pub fn from_base64(
        mime_type: impl Into<String>,
        data: &str,
        filename: Option<String>,
    ) -> Result<Self, base64::DecodeError> {
        Ok(Self {
            mime_type: mime_type.into(),
            data: Bytes::from(STANDARD.decode(data.trim())?),
            filename,
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    /// The attachment's filename, or `media.<subtype>` derived from the MIME type.
    pub fn filename_or_default(&self) -> String {
        match self.filename.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => default_media_filename(&self.mime_type),
        }
    }
}

/// `media.<subtype>` for a MIME type, `media.bin` when it has none.
pub fn default_media_filename(mime_type: &str) -> String {
    let ext = mime_type
        .split('/')
        .nth(1)
        .map(|sub| sub.split(';').next().unwrap_or(sub).trim())
        .filter(|sub| !sub.is_empty())
        .unwrap_or("bin");
    format!("media.{ext}")
}

/// A message received from the chat network for one account.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub account_id: String,
    pub sender_id: String,
    pub chat_id: String,
    pub body: String,
    pub message_type: String,
    /// Unix seconds, as reported by the network.
    pub timestamp: i64,
    pub is_group: bool,
    pub media: Option<MediaAttachment>,
}

/// Media to send to a chat.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMedia {
    pub mime_type: String,
    pub data: Bytes,
    pub filename: Option<String>,
    pub caption: Option<String>,
}

impl OutboundMedia {
    /// Decode a base64 upload; empty captions are dropped.
    pub fn from_base64(
        mime_type: &str,
        data: &str,
        filename: Option<String>,
        caption: Option<String>,
    ) -> Result<Self> {
        if mime_type.trim().is_empty() {
            return Err(Error::invalid("mimeType is required"));
        }
        let decoded = STANDARD
            .decode(data.trim())
            .map_err(|e| Error::invalid(format!("mediaBase64 is not valid base64: {e}")))?;
        if decoded.is_empty() {
            return Err(Error::invalid("mediaBase64 is empty"));
        }
        Ok(Self {
            mime_type: mime_type.trim().to_string(),
            data: Bytes::from(decoded),
            filename: filename.filter(|f| !f.is_empty()),
            caption: caption.filter(|c| !c.is_empty()),
        })
    }

    /// Coarse media category used by the network when uploading.
    pub fn kind(&self) -> &'static str {
        match self.mime_type.as_str() {
            t if t.starts_with("image/") => "image",
            t if t.starts_with("video/") => "video",
            t if t.starts_with("audio/") => "audio",
            _ => "document",
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// A reply button. Accepts either a bare string or `{id?, body}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ButtonRepr")]
pub struct Button {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub body: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ButtonRepr {
    Plain(String),
    Full {
        #[serde(default)]
        id: Option<String>,
        body: String,
    },
}

impl From<ButtonRepr> for Button {
    fn from(repr: ButtonRepr) -> Self {
        match repr {
            ButtonRepr::Plain(body) => Self { id: None, body },
            ButtonRepr::Full { id, body } => Self { id, body },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonsMessage {
    #[serde(alias = "text")]
    pub body: String,
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessage {
    #[serde(alias = "text")]
    pub body: String,
    pub button_text: String,
    pub sections: Vec<ListSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

/// Interactive message: reply buttons or a selection list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum StructuredMessage {
    Buttons(ButtonsMessage),
    List(ListMessage),
}

impl StructuredMessage {
    /// Build from the API's separate `kind` and `payload` fields.
    pub fn from_parts(kind: &str, payload: serde_json::Value) -> Result<Self> {
        let msg = match kind {
            "buttons" => Self::Buttons(
                serde_json::from_value(payload)
                    .map_err(|e| Error::invalid(format!("invalid buttons payload: {e}")))?,
            ),
            "list" => Self::List(
                serde_json::from_value(payload)
                    .map_err(|e| Error::invalid(format!("invalid list payload: {e}")))?,
            ),
            other => return Err(Error::invalid(format!("unknown structured kind: {other}"))),
        };
        msg.validate()?;
        Ok(msg)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Buttons(b) => {
                if b.body.trim().is_empty() {
                    return Err(Error::invalid("buttons body is required"));
                }
                if b.buttons.is_empty() {
                    return Err(Error::invalid("at least one button is required"));
                }
                if b.buttons.iter().any(|btn| btn.body.trim().is_empty()) {
                    return Err(Error::invalid("button body must not be empty"));
                }
            },
            Self::List(l) => {
                if l.body.trim().is_empty() {
                    return Err(Error::invalid("list body is required"));
                }
                if l.button_text.trim().is_empty() {
                    return Err(Error::invalid("buttonText is required"));
                }
                if l.sections.is_empty() || l.sections.iter().any(|s| s.rows.is_empty()) {
                    return Err(Error::invalid("every list section needs at least one row"));
                }
                if l
                    .sections
                    .iter()
                    .flat_map(|s| &s.rows)
                    .any(|r| r.title.trim().is_empty())
                {
                    return Err(Error::invalid("list row title must not be empty"));
                }
            },
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buttons(_) => "buttons",
            Self::List(_) => "list",
        }
    }
}

/// Presence signal sent to a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Typing,
    Seen,
    Available,
}

impl FromStr for PresenceAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "typing" => Ok(Self::Typing),
            "seen" => Ok(Self::Seen),
            "available" => Ok(Self::Available),
            other => Err(Error::invalid(format!("unknown presence action: {other}"))),
        }
    }
}

impl fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Typing => "typing",
            Self::Seen => "seen",
            Self::Available => "available",
        })
    }
}
