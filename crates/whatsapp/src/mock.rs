//! In-process [`ChatNetwork`] for tests.
//!
//! Every `open` hands back a [`MockClient`] that records what it was asked to
//! send, and an event stream the test drives with [`MockNetwork::emit`].

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    tokio::sync::mpsc,
    wagate_common::{
        Error, Result,
        types::{Credential, OutboundMedia, PresenceAction, StructuredMessage},
    },
};

use crate::network::{ChatClient, ChatNetwork, EventStream, NetworkEvent};

/// A call recorded by [`MockClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    Text { to: String, text: String },
    Media { to: String, media: OutboundMedia },
    Structured { to: String, message: StructuredMessage },
    Presence { to: String, action: PresenceAction },
    Logout,
}

#[derive(Default)]
pub struct MockClient {
    sent: Mutex<Vec<SentMessage>>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl MockClient {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every subsequent send fail with an upstream error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, msg: SentMessage) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::upstream("mock send failure"));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
        Ok(())
    }
}

#[async_trait]
impl ChatClient for MockClient {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.record(SentMessage::Text {
            to: chat_id.to_string(),
            text: text.to_string(),
        })
    }

    async fn send_media(&self, chat_id: &str, media: &OutboundMedia) -> Result<()> {
        self.record(SentMessage::Media {
            to: chat_id.to_string(),
            media: media.clone(),
        })
    }

    async fn send_structured(&self, chat_id: &str, message: &StructuredMessage) -> Result<()> {
        self.record(SentMessage::Structured {
            to: chat_id.to_string(),
            message: message.clone(),
        })
    }

    async fn send_presence(&self, chat_id: &str, action: PresenceAction) -> Result<()> {
        self.record(SentMessage::Presence {
            to: chat_id.to_string(),
            action,
        })
    }

    async fn logout(&self) -> Result<()> {
        self.record(SentMessage::Logout)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockAccount {
    client: Arc<MockClient>,
    events: mpsc::Sender<NetworkEvent>,
    credential: Option<Credential>,
}

#[derive(Default)]
pub struct MockNetwork {
    accounts: DashMap<String, MockAccount>,
    opens: AtomicUsize,
    fail_open: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Client of the most recent `open` for the account.
    pub fn client(&self, account_id: &str) -> Option<Arc<MockClient>> {
        self.accounts
            .get(account_id)
            .map(|a| Arc::clone(&a.client))
    }

    /// Credential passed to the most recent `open` for the account.
    pub fn credential_seen(&self, account_id: &str) -> Option<Credential> {
        self.accounts
            .get(account_id)
            .and_then(|a| a.credential.clone())
    }

    /// Push an event to the account's stream. Returns false if nobody listens.
    pub async fn emit(&self, account_id: &str, event: NetworkEvent) -> bool {
        let Some(tx) = self.accounts.get(account_id).map(|a| a.events.clone()) else {
            return false;
        };
        tx.send(event).await.is_ok()
    }

    /// Poll until the account has been opened `count` times in total.
    pub async fn wait_for_open(&self, account_id: &str, count: usize) -> Option<Arc<MockClient>> {
        for _ in 0..200 {
            if self.open_count() >= count
                && let Some(client) = self.client(account_id)
            {
                return Some(client);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl ChatNetwork for MockNetwork {
    async fn open(
        &self,
        account_id: &str,
        credential: Option<Credential>,
    ) -> Result<(Arc<dyn ChatClient>, EventStream)> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::upstream("mock network unavailable"));
        }
        let client = Arc::new(MockClient::default());
        let (tx, rx) = mpsc::channel(64);
        self.accounts.insert(account_id.to_string(), MockAccount {
            client: Arc::clone(&client),
            events: tx,
            credential,
        });
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok((client as Arc<dyn ChatClient>, rx))
    }
}
