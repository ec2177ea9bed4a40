//! Session registry and per-session supervision.

use std::{collections::HashMap, sync::Arc};

use {
    tokio::sync::RwLock,
    tokio_util::sync::CancellationToken,
    tracing::{Instrument, debug, info, info_span, warn},
    url::Url,
    wagate_common::{Error, Result, types::Credential},
    wagate_credentials::CredentialStore,
    wagate_webhook::{WebhookDispatcher, WebhookPayload, WebhookQueue},
    wagate_whatsapp::{ChatNetwork, Connection, Effect, NetworkEvent},
};

#[cfg(feature = "metrics")]
use wagate_metrics::{counter, definitions::sessions as session_metrics, gauge};

use crate::session::{Session, SessionSummary};

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    network: Arc<dyn ChatNetwork>,
    store: Arc<dyn CredentialStore>,
    dispatcher: WebhookDispatcher,
    default_webhook: Option<Url>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(
        network: Arc<dyn ChatNetwork>,
        store: Arc<dyn CredentialStore>,
        dispatcher: WebhookDispatcher,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            network,
            store,
            dispatcher,
            default_webhook: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Webhook used by sessions started without one.
    pub fn with_default_webhook(mut self, url: Option<Url>) -> Self {
        self.default_webhook = url;
        self
    }

    /// Create the session for `account_id`, or return the live one.
    ///
    /// A session that ended in `AuthFailed` or `Disconnected` is replaced by a
    /// fresh one. A new session is registered as `Uninitialized` before this returns; the
    /// credential fetch and network handshake run on the session's own task.
    /// The webhook of an already live session is left unchanged.
    pub async fn start_session(
        self: &Arc<Self>,
        account_id: &str,
        webhook_url: Option<Url>,
    ) -> Result<Arc<Session>> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(Error::invalid("accountId is required"));
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::upstream("gateway is shutting down"));
        }

        let (session, replaced) = {
            let mut sessions = self.sessions.write().await;
            if let Some(existing) = sessions.get(account_id)
                && !existing.auth_state().is_terminal()
            {
                debug!(account_id, "session already live");
                return Ok(Arc::clone(existing));
            }
            let connection = Connection::new(account_id, self.shutdown.child_token());
            let webhook_url = webhook_url.or_else(|| self.default_webhook.clone());
            let session = Arc::new(Session::new(connection, webhook_url));
            let replaced = sessions.insert(account_id.to_string(), Arc::clone(&session));
            #[cfg(feature = "metrics")]
            gauge!(session_metrics::ACTIVE).set(sessions.len() as f64);
            (session, replaced)
        };

        // A failed or dropped connection is replaced; its supervisor winds down
        // on its own and leaves the new entry alone.
        if let Some(old) = replaced {
            info!(account_id, state = %old.auth_state(), "replacing ended session");
            old.connection().close("replaced by a new session").await;
            self.record_teardown(1).await;
        }

        info!(account_id, webhook = ?session.webhook_url().map(Url::as_str), "session started");
        #[cfg(feature = "metrics")]
        counter!(session_metrics::STARTED_TOTAL).increment(1);

        let span = info_span!("session", account_id);
        tokio::spawn(
            Arc::clone(self)
                .supervise(Arc::clone(&session))
                .instrument(span),
        );
        Ok(session)
    }

    pub async fn get(&self, account_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(account_id).cloned()
    }

    /// Like [`get`](Self::get) but fails with `NotFound`.
    pub async fn require(&self, account_id: &str) -> Result<Arc<Session>> {
        self.get(account_id)
            .await
            .ok_or_else(|| Error::NotFound(account_id.to_string()))
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.summary())
            .collect();
        summaries.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Log the account out on the network and tear its session down.
    pub async fn stop_session(&self, account_id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(account_id)
            .ok_or_else(|| Error::NotFound(account_id.to_string()))?;
        self.record_teardown(1).await;
        session.connection().logout().await;
        info!(account_id, "session stopped");
        Ok(())
    }

    /// Close every session and return how many were closed. Credentials are
    /// kept so sessions can resume on the next start.
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        futures::future::join_all(
            sessions
                .iter()
                .map(|s| s.connection().close("gateway shutdown")),
        )
        .await;
        self.record_teardown(count as u64).await;
        info!(count, "all sessions closed");
        count
    }

    /// Drive one session from credential restore until its connection ends.
    async fn supervise(self: Arc<Self>, session: Arc<Session>) {
        let account_id = session.account_id().to_string();
        let conn = session.connection();

        let credential = match self.store.fetch(&account_id).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "credential fetch failed, starting fresh pairing");
                None
            },
        };
        debug!(restored = credential.is_some(), "opening connection");

        let opened = tokio::select! {
            _ = conn.cancellation().cancelled() => None,
            opened = self.network.open(&account_id, credential) => Some(opened),
        };
        let mut events = match opened {
            Some(Ok((client, events))) => {
                conn.attach(client);
                events
            },
            Some(Err(e)) => {
                warn!(error = %e, "failed to open connection");
                conn.close(&format!("connection failed: {e}")).await;
                self.remove(&session).await;
                return;
            },
            None => {
                self.remove(&session).await;
                return;
            },
        };
        if conn.is_closed() {
            conn.close("session stopped").await;
            self.remove(&session).await;
            return;
        }

        let queue = session
            .webhook_url()
            .map(|url| self.dispatcher.spawn_worker(&account_id, url.clone()));

        loop {
            let event = tokio::select! {
                _ = conn.cancellation().cancelled() => break,
                event = events.recv() => event
                    .unwrap_or_else(|| NetworkEvent::Disconnected("event stream ended".into())),
            };
            match conn.handle(event) {
                Effect::None => {},
                Effect::PersistCredential(credential) => self.persist(conn, credential),
                Effect::Inbound(message) => relay(queue.as_ref(), message.into()),
                Effect::Closed => break,
            }
        }

        conn.close("session ended").await;
        self.remove(&session).await;
        if let Some(queue) = queue {
            queue.drain().await;
        }
        debug!("session supervisor finished");
    }

    /// Save a fresh credential without holding up event processing.
    /// The save is abandoned if the session is torn down first.
    fn persist(&self, conn: &Connection, credential: Credential) {
        let store = Arc::clone(&self.store);
        let cancel = conn.cancellation().clone();
        let account_id = conn.account_id().to_string();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => debug!("credential save abandoned on teardown"),
                    result = store.save(&account_id, &credential) => match result {
                        Ok(()) => info!("credential persisted"),
                        Err(e) => warn!(error = %e, "credential save failed"),
                    },
                }
            }
            .in_current_span(),
        );
    }

    /// Drop `session` from the map unless a newer session took its place.
    async fn remove(&self, session: &Arc<Session>) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session.account_id()) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    sessions.remove(session.account_id());
                    true
                },
                _ => false,
            }
        };
        if removed {
            info!(state = %session.auth_state(), "session torn down");
            self.record_teardown(1).await;
        }
    }

    async fn record_teardown(&self, count: u64) {
        #[cfg(not(feature = "metrics"))]
        let _ = count;
        #[cfg(feature = "metrics")]
        {
            counter!(session_metrics::TORN_DOWN_TOTAL).increment(count);
            gauge!(session_metrics::ACTIVE).set(self.len().await as f64);
        }
    }
}

fn relay(queue: Option<&WebhookQueue>, payload: WebhookPayload) {
    match queue {
        Some(queue) => {
            queue.enqueue(payload);
        },
        None => debug!(from = %payload.from, "no webhook configured, inbound message dropped"),
    }
}
