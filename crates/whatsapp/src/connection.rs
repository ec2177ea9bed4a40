//! Per-account connection: authentication state machine and send operations.
//!
//! The state lives in a `watch` channel so readers always see a whole
//! snapshot, and transitions happen only through [`Connection::handle`] and
//! [`Connection::close`]. Once `AuthFailed` or `Disconnected` is reached the
//! connection never leaves it; a new connection must be created to resume.

use std::sync::{Arc, OnceLock};

use {
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    wagate_common::{
        Error, Result,
        types::{AuthState, Credential, InboundMessage, OutboundMedia, PresenceAction, StructuredMessage},
    },
};

#[cfg(feature = "metrics")]
use wagate_metrics::{
    counter,
    definitions::{labels, outbound, sessions},
};

use crate::{
    jid::normalize_chat_id,
    network::{ChatClient, NetworkEvent},
    qr::QrImage,
};

/// Snapshot of a connection's authentication state.
///
/// The QR image only exists while a scan is awaited.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Uninitialized,
    AwaitingScan { qr: QrImage },
    Authenticated,
    AuthFailed { reason: String },
    Disconnected { reason: String },
}

impl ConnectionState {
    pub fn auth_state(&self) -> AuthState {
        match self {
            Self::Uninitialized => AuthState::Uninitialized,
            Self::AwaitingScan { .. } => AuthState::AwaitingScan,
            Self::Authenticated => AuthState::Authenticated,
            Self::AuthFailed { .. } => AuthState::AuthFailed,
            Self::Disconnected { .. } => AuthState::Disconnected,
        }
    }

    pub fn qr_image(&self) -> Option<&QrImage> {
        match self {
            Self::AwaitingScan { qr } => Some(qr),
            _ => None,
        }
    }
}

/// What the owner of a connection must do after an event was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Persist the credential produced by a successful pairing.
    PersistCredential(Credential),
    /// Relay an inbound message.
    Inbound(InboundMessage),
    /// The connection reached `Disconnected`; tear the session down.
    Closed,
}

pub struct Connection {
    account_id: String,
    state: watch::Sender<ConnectionState>,
    client: OnceLock<Arc<dyn ChatClient>>,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(account_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            account_id: account_id.into(),
            state: watch::Sender::new(ConnectionState::Uninitialized),
            client: OnceLock::new(),
            cancel,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn auth_state(&self) -> AuthState {
        self.state.borrow().auth_state()
    }

    pub fn qr_image(&self) -> Option<QrImage> {
        self.state.borrow().qr_image().cloned()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Cancelled when the connection is torn down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bind the network client once the handshake has started.
    pub fn attach(&self, client: Arc<dyn ChatClient>) {
        if self.client.set(client).is_err() {
            warn!(account_id = %self.account_id, "network client already attached");
        }
    }

    /// Apply a network event to the state machine.
    pub fn handle(&self, event: NetworkEvent) -> Effect {
        if self.is_closed() {
            debug!(account_id = %self.account_id, ?event, "event after teardown ignored");
            return Effect::None;
        }
        match event {
            NetworkEvent::Qr(payload) => {
                self.on_qr(&payload);
                Effect::None
            },
            NetworkEvent::Authenticated(credential) => {
                if self.transition_to_authenticated() {
                    credential.map_or(Effect::None, Effect::PersistCredential)
                } else {
                    Effect::None
                }
            },
            NetworkEvent::Ready => {
                self.transition_to_authenticated();
                Effect::None
            },
            NetworkEvent::AuthFailure(reason) => {
                self.on_auth_failure(reason);
                Effect::None
            },
            NetworkEvent::Message(message) => {
                if self.auth_state().is_terminal() {
                    return Effect::None;
                }
                debug!(
                    account_id = %self.account_id,
                    sender_id = %message.sender_id,
                    message_type = %message.message_type,
                    "inbound message"
                );
                Effect::Inbound(message)
            },
            NetworkEvent::Disconnected(reason) => {
                if self.mark_disconnected(&reason) {
                    Effect::Closed
                } else {
                    Effect::None
                }
            },
        }
    }

    fn on_qr(&self, payload: &str) {
        let qr = match QrImage::render(payload) {
            Ok(qr) => qr,
            Err(e) => {
                warn!(account_id = %self.account_id, error = %e, "failed to render pairing QR");
                return;
            },
        };
        let changed = self.state.send_if_modified(|state| match state {
            ConnectionState::Uninitialized | ConnectionState::AwaitingScan { .. } => {
                *state = ConnectionState::AwaitingScan { qr };
                true
            },
            _ => false,
        });
        if changed {
            info!(account_id = %self.account_id, "pairing QR issued");
            self.record_transition(AuthState::AwaitingScan);
        } else {
            debug!(account_id = %self.account_id, "pairing QR ignored in current state");
        }
    }

    fn transition_to_authenticated(&self) -> bool {
        let changed = self.state.send_if_modified(|state| match state {
            ConnectionState::Uninitialized | ConnectionState::AwaitingScan { .. } => {
                *state = ConnectionState::Authenticated;
                true
            },
            _ => false,
        });
        if changed {
            info!(account_id = %self.account_id, "authenticated");
            self.record_transition(AuthState::Authenticated);
        }
        changed || self.auth_state() == AuthState::Authenticated
    }

    fn on_auth_failure(&self, reason: String) {
        let changed = self.state.send_if_modified(|state| match state {
            ConnectionState::Uninitialized | ConnectionState::AwaitingScan { .. } => {
                *state = ConnectionState::AuthFailed {
                    reason: reason.clone(),
                };
                true
            },
            _ => false,
        });
        if changed {
            warn!(account_id = %self.account_id, reason, "authentication failed");
            self.record_transition(AuthState::AuthFailed);
        } else {
            debug!(account_id = %self.account_id, reason, "auth failure ignored in current state");
        }
    }

    /// Move to `Disconnected` and cancel in-flight work. Returns false if the
    /// connection was already disconnected.
    fn mark_disconnected(&self, reason: &str) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Disconnected { .. }) {
                return false;
            }
            *state = ConnectionState::Disconnected {
                reason: reason.to_string(),
            };
            true
        });
        self.cancel.cancel();
        if changed {
            info!(account_id = %self.account_id, reason, "disconnected");
            self.record_transition(AuthState::Disconnected);
        }
        changed
    }

    /// Tear the connection down: disconnect, fail pending sends, release the client.
    pub async fn close(&self, reason: &str) {
        self.mark_disconnected(reason);
        if let Some(client) = self.client.get() {
            client.close().await;
        }
    }

    /// Log the account out on the network, then tear down.
    pub async fn logout(&self) {
        if !self.is_closed()
            && let Some(client) = self.client.get()
            && let Err(e) = client.logout().await
        {
            warn!(account_id = %self.account_id, error = %e, "logout failed");
        }
        self.close("logged out").await;
    }

    /// Fails with `Unauthenticated` unless the connection can send right now.
    pub fn ensure_authenticated(&self) -> Result<()> {
        self.authenticated_client().map(|_| ())
    }

    fn authenticated_client(&self) -> Result<Arc<dyn ChatClient>> {
        if self.is_closed() || self.auth_state() != AuthState::Authenticated {
            return Err(Error::Unauthenticated);
        }
        self.client.get().cloned().ok_or(Error::Unauthenticated)
    }

    /// Run a send, aborting it if the connection is torn down meanwhile.
    async fn guarded<F>(&self, kind: &'static str, send: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::upstream("connection closed")),
            result = send => result,
        };
        if let Err(e) = &result {
            warn!(account_id = %self.account_id, kind, error = %e, "send failed");
        }
        #[cfg(feature = "metrics")]
        counter!(
            outbound::SENDS_TOTAL,
            labels::KIND => kind,
            labels::RESULT => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let client = self.authenticated_client()?;
        let chat_id = normalize_chat_id(to)?;
        debug!(account_id = %self.account_id, to = %chat_id, "sending text");
        self.guarded("text", client.send_text(&chat_id, text)).await
    }

    pub async fn send_media(&self, to: &str, media: &OutboundMedia) -> Result<()> {
        let client = self.authenticated_client()?;
        let chat_id = normalize_chat_id(to)?;
        debug!(
            account_id = %self.account_id,
            to = %chat_id,
            mime_type = %media.mime_type,
            "sending media"
        );
        self.guarded("media", client.send_media(&chat_id, media))
            .await
    }

    pub async fn send_structured(&self, to: &str, message: &StructuredMessage) -> Result<()> {
        let client = self.authenticated_client()?;
        let chat_id = normalize_chat_id(to)?;
        debug!(
            account_id = %self.account_id,
            to = %chat_id,
            kind = message.kind(),
            "sending structured message"
        );
        self.guarded(message.kind(), client.send_structured(&chat_id, message))
            .await
    }

    pub async fn send_presence(&self, to: &str, action: PresenceAction) -> Result<()> {
        let client = self.authenticated_client()?;
        let chat_id = normalize_chat_id(to)?;
        debug!(account_id = %self.account_id, to = %chat_id, %action, "sending presence");
        self.guarded("presence", client.send_presence(&chat_id, action))
            .await
    }

    fn record_transition(&self, _to: AuthState) {
        #[cfg(feature = "metrics")]
        counter!(sessions::AUTH_TRANSITIONS_TOTAL, labels::STATE => _to.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {async_trait::async_trait, bytes::Bytes};

    use super::*;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
        hang: bool,
    }

    impl RecordingClient {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChatClient for RecordingClient {
        async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
            self.record(format!("text {chat_id} {text}")).await
        }

        async fn send_media(&self, chat_id: &str, media: &OutboundMedia) -> Result<()> {
            self.record(format!("media {chat_id} {}", media.mime_type)).await
        }

        async fn send_structured(&self, chat_id: &str, message: &StructuredMessage) -> Result<()> {
            self.record(format!("{} {chat_id}", message.kind())).await
        }

        async fn send_presence(&self, chat_id: &str, action: PresenceAction) -> Result<()> {
            self.record(format!("presence {chat_id} {action}")).await
        }

        async fn logout(&self) -> Result<()> {
            self.record("logout".into()).await
        }

        async fn close(&self) {
            self.calls.lock().unwrap().push("close".into());
        }
    }

    fn connection() -> (Connection, Arc<RecordingClient>) {
        let conn = Connection::new("1555", CancellationToken::new());
        let client = Arc::new(RecordingClient::default());
        conn.attach(client.clone());
        (conn, client)
    }

    fn message(body: &str) -> InboundMessage {
        InboundMessage {
            account_id: "1555".into(),
            sender_id: "1666@c.us".into(),
            chat_id: "1666@c.us".into(),
            body: body.into(),
            message_type: "chat".into(),
            timestamp: 1_700_000_000,
            is_group: false,
            media: None,
        }
    }

    #[test]
    fn qr_then_scan() {
        let (conn, _) = connection();
        assert_eq!(conn.auth_state(), AuthState::Uninitialized);
        assert!(conn.qr_image().is_none());

        assert_eq!(conn.handle(NetworkEvent::Qr("pair-1".into())), Effect::None);
        assert_eq!(conn.auth_state(), AuthState::AwaitingScan);
        assert!(!conn.qr_image().unwrap().png().is_empty());

        let cred = Credential::new(serde_json::json!({"token": "abc"}));
        assert_eq!(
            conn.handle(NetworkEvent::Authenticated(Some(cred.clone()))),
            Effect::PersistCredential(cred)
        );
        assert_eq!(conn.auth_state(), AuthState::Authenticated);
        assert!(conn.qr_image().is_none());
    }

    #[test]
    fn qr_refresh_replaces_image() {
        let (conn, _) = connection();
        conn.handle(NetworkEvent::Qr("pair-1".into()));
        let first = conn.qr_image().unwrap();
        conn.handle(NetworkEvent::Qr("pair-2".into()));
        assert_ne!(conn.qr_image().unwrap(), first);
    }

    #[test]
    fn ready_authenticates_without_persisting() {
        let (conn, _) = connection();
        conn.handle(NetworkEvent::Qr("pair".into()));
        assert_eq!(conn.handle(NetworkEvent::Ready), Effect::None);
        assert_eq!(conn.auth_state(), AuthState::Authenticated);
        assert!(conn.qr_image().is_none());
    }

    #[test]
    fn auth_failure_is_terminal() {
        let (conn, _) = connection();
        conn.handle(NetworkEvent::Qr("pair".into()));
        conn.handle(NetworkEvent::AuthFailure("bad session".into()));
        assert_eq!(conn.auth_state(), AuthState::AuthFailed);
        assert!(conn.qr_image().is_none());

        conn.handle(NetworkEvent::Qr("again".into()));
        conn.handle(NetworkEvent::Ready);
        assert_eq!(conn.auth_state(), AuthState::AuthFailed);
        assert_eq!(conn.handle(NetworkEvent::Message(message("late"))), Effect::None);
    }

    #[test]
    fn disconnect_is_terminal_and_reported_once() {
        let (conn, _) = connection();
        conn.handle(NetworkEvent::Ready);
        assert_eq!(
            conn.handle(NetworkEvent::Disconnected("NAVIGATION".into())),
            Effect::Closed
        );
        assert!(conn.is_closed());
        assert_eq!(conn.auth_state(), AuthState::Disconnected);
        assert_eq!(
            conn.handle(NetworkEvent::Disconnected("again".into())),
            Effect::None
        );
        assert_eq!(conn.handle(NetworkEvent::Ready), Effect::None);
        assert_eq!(conn.auth_state(), AuthState::Disconnected);
    }

    #[test]
    fn messages_are_relayed_while_live() {
        let (conn, _) = connection();
        conn.handle(NetworkEvent::Ready);
        assert_eq!(
            conn.handle(NetworkEvent::Message(message("hi"))),
            Effect::Inbound(message("hi"))
        );
    }

    #[tokio::test]
    async fn sends_require_authentication() {
        let (conn, client) = connection();
        let media = OutboundMedia {
            mime_type: "image/png".into(),
            data: Bytes::from_static(b"png"),
            filename: None,
            caption: None,
        };

        assert_eq!(conn.send_text("1666", "hi").await, Err(Error::Unauthenticated));
        conn.handle(NetworkEvent::Qr("pair".into()));
        assert_eq!(conn.send_media("1666", &media).await, Err(Error::Unauthenticated));
        assert_eq!(
            conn.send_presence("1666", PresenceAction::Typing).await,
            Err(Error::Unauthenticated)
        );
        assert!(client.calls().is_empty());

        conn.handle(NetworkEvent::Ready);
        conn.send_text("+1 666", "hi").await.unwrap();
        conn.send_media("1666", &media).await.unwrap();
        assert_eq!(client.calls(), vec![
            "text 1666@c.us hi".to_string(),
            "media 1666@c.us image/png".to_string(),
        ]);
    }

    #[tokio::test]
    async fn sends_fail_after_close() {
        let (conn, client) = connection();
        conn.handle(NetworkEvent::Ready);
        conn.close("shutdown").await;
        assert_eq!(conn.send_text("1666", "hi").await, Err(Error::Unauthenticated));
        assert_eq!(client.calls(), vec!["close".to_string()]);
    }

    #[tokio::test]
    async fn teardown_cancels_in_flight_send() {
        let conn = Arc::new(Connection::new("1555", CancellationToken::new()));
        conn.attach(Arc::new(RecordingClient {
            hang: true,
            ..Default::default()
        }));
        conn.handle(NetworkEvent::Ready);

        let sender = Arc::clone(&conn);
        let pending = tokio::spawn(async move { sender.send_text("1666", "hi").await });
        tokio::task::yield_now().await;
        conn.close("shutdown").await;

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(Error::UpstreamFailure("connection closed".into())));
    }

    #[tokio::test]
    async fn invalid_destination_is_rejected_before_sending() {
        let (conn, client) = connection();
        conn.handle(NetworkEvent::Ready);
        assert!(matches!(
            conn.send_text("not a number", "hi").await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn logout_then_close() {
        let (conn, client) = connection();
        conn.handle(NetworkEvent::Ready);
        conn.logout().await;
        assert_eq!(client.calls(), vec!["logout".to_string(), "close".to_string()]);
        assert_eq!(conn.auth_state(), AuthState::Disconnected);
    }
}
