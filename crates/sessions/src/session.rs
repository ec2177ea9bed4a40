use {
    serde::Serialize,
    url::Url,
    wagate_common::types::AuthState,
    wagate_whatsapp::{Connection, QrImage},
};

/// One live account: its connection and where inbound events go.
pub struct Session {
    webhook_url: Option<Url>,
    connection: Connection,
}

impl Session {
    pub(crate) fn new(connection: Connection, webhook_url: Option<Url>) -> Self {
        Self {
            webhook_url,
            connection,
        }
    }

    pub fn account_id(&self) -> &str {
        self.connection.account_id()
    }

    pub fn webhook_url(&self) -> Option<&Url> {
        self.webhook_url.as_ref()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn auth_state(&self) -> AuthState {
        self.connection.auth_state()
    }

    /// Present only while a scan is awaited.
    pub fn qr_image(&self) -> Option<QrImage> {
        self.connection.qr_image()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            account_id: self.account_id().to_string(),
            auth_state: self.auth_state(),
            webhook_url: self.webhook_url.as_ref().map(Url::to_string),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id())
            .field("auth_state", &self.auth_state())
            .field("webhook_url", &self.webhook_url)
            .finish()
    }
}

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub account_id: String,
    pub auth_state: AuthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}
