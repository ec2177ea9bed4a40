//! WebSocket communication with the chat sidecar.
//!
//! Each account gets its own socket. Outbound frames go through a writer task;
//! a reader task turns inbound frames into [`NetworkEvent`]s and resolves
//! pending sends from `send_result` frames.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    async_trait::async_trait,
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    uuid::Uuid,
    wagate_common::{
        Error, Result,
        types::{
            Credential, OutboundMedia, PresenceAction, StructuredMessage, default_media_filename,
        },
    },
    wagate_config::SidecarConfig,
};

use crate::{
    network::{ChatClient, ChatNetwork, EventStream, NetworkEvent},
    types::{GatewayMessage, SidecarMessage},
};

const RETRY_DELAY: Duration = Duration::from_secs(2);
const EVENT_BUFFER: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingSends = Arc<DashMap<String, oneshot::Sender<Result<(), String>>>>;

/// [`ChatNetwork`] that drives accounts through the sidecar process.
#[derive(Debug, Clone)]
pub struct SidecarNetwork {
    url: String,
    connect_retries: u32,
    send_timeout: Duration,
}

impl SidecarNetwork {
    pub fn new(url: impl Into<String>, connect_retries: u32, send_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_retries: connect_retries.max(1),
            send_timeout,
        }
    }

    pub fn from_config(config: &SidecarConfig) -> Self {
        Self::new(&config.url, config.connect_retries, config.send_timeout())
    }
}

#[async_trait]
impl ChatNetwork for SidecarNetwork {
    async fn open(
        &self,
        account_id: &str,
        credential: Option<Credential>,
    ) -> Result<(Arc<dyn ChatClient>, EventStream)> {
        let socket = connect_with_retry(&self.url, self.connect_retries)
            .await
            .map_err(|e| Error::upstream(format!("{e:#}")))?;
        let (client, events) = spawn_session(account_id, socket, self.send_timeout);

        client
            .tx
            .send(GatewayMessage::Login {
                account_id: account_id.to_string(),
                credential,
            })
            .await
            .map_err(|_| Error::upstream("sidecar connection closed"))?;
        info!(account_id, "login requested from sidecar");

        let client: Arc<dyn ChatClient> = Arc::new(client);
        Ok((client, events))
    }
}

/// Live sidecar socket for one account.
pub struct SidecarClient {
    account_id: String,
    tx: mpsc::Sender<GatewayMessage>,
    pending: PendingSends,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl SidecarClient {
    /// Send a frame and wait for the matching `send_result`.
    async fn call(&self, build: impl FnOnce(String) -> GatewayMessage) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::upstream("sidecar connection closed"));
        }
        let request_id = Uuid::new_v4().to_string();
        let (done_tx, done_rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), done_tx);

        if self.tx.send(build(request_id.clone())).await.is_err() {
            self.pending.remove(&request_id);
            return Err(Error::upstream("sidecar connection closed"));
        }

        match tokio::time::timeout(self.send_timeout, done_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(Error::upstream(reason)),
            Ok(Err(_)) => Err(Error::upstream("sidecar connection closed")),
            Err(_) => {
                self.pending.remove(&request_id);
                warn!(account_id = %self.account_id, request_id, "send result timed out");
                Err(Error::upstream("timed out waiting for send result"))
            },
        }
    }
}

#[async_trait]
impl ChatClient for SidecarClient {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.call(|request_id| GatewayMessage::SendText {
            to: chat_id.to_string(),
            text: text.to_string(),
            request_id,
        })
        .await
    }

    async fn send_media(&self, chat_id: &str, media: &OutboundMedia) -> Result<()> {
        let filename = media
            .filename
            .clone()
            .unwrap_or_else(|| default_media_filename(&media.mime_type));
        self.call(|request_id| GatewayMessage::SendMedia {
            to: chat_id.to_string(),
            mimetype: media.mime_type.clone(),
            data: media.to_base64(),
            filename,
            media_type: media.kind().to_string(),
            caption: media.caption.clone(),
            request_id,
        })
        .await
    }

    async fn send_structured(&self, chat_id: &str, message: &StructuredMessage) -> Result<()> {
        let to = chat_id.to_string();
        match message {
            StructuredMessage::Buttons(b) => {
                self.call(|request_id| GatewayMessage::SendButtons {
                    to,
                    body: b.body.clone(),
                    buttons: b.buttons.clone(),
                    title: b.title.clone(),
                    footer: b.footer.clone(),
                    request_id,
                })
                .await
            },
            StructuredMessage::List(l) => {
                self.call(|request_id| GatewayMessage::SendList {
                    to,
                    body: l.body.clone(),
                    button_text: l.button_text.clone(),
                    sections: l.sections.clone(),
                    title: l.title.clone(),
                    footer: l.footer.clone(),
                    request_id,
                })
                .await
            },
        }
    }

    async fn send_presence(&self, chat_id: &str, action: PresenceAction) -> Result<()> {
        self.call(|request_id| GatewayMessage::SendPresence {
            to: chat_id.to_string(),
            action,
            request_id,
        })
        .await
    }

    async fn logout(&self) -> Result<()> {
        self.call(|request_id| GatewayMessage::Logout { request_id })
            .await
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.pending.clear();
    }
}

/// Split the socket into reader and writer tasks bound to one account.
fn spawn_session(
    account_id: &str,
    socket: Socket,
    send_timeout: Duration,
) -> (SidecarClient, EventStream) {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(32);
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let pending: PendingSends = Arc::new(DashMap::new());
    let shutdown = CancellationToken::new();

    let writer_shutdown = shutdown.clone();
    let writer_account = account_id.to_string();
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if let Err(e) = write.send(Message::Text(json.into())).await {
                        error!(account_id = %writer_account, error = %e, "failed to send frame to sidecar");
                        break;
                    }
                    debug!(account_id = %writer_account, request_id = ?msg.request_id(), "sent frame to sidecar");
                },
                Err(e) => {
                    error!(account_id = %writer_account, error = %e, "failed to serialize frame");
                },
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    let reader_shutdown = shutdown.clone();
    let reader_pending = Arc::clone(&pending);
    let reader_account = account_id.to_string();
    tokio::spawn(async move {
        let reason = loop {
            let frame = tokio::select! {
                _ = reader_shutdown.cancelled() => break None,
                frame = read.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    let msg = match serde_json::from_str::<SidecarMessage>(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(account_id = %reader_account, error = %e, text = %text, "failed to parse sidecar frame");
                            continue;
                        },
                    };
                    match msg {
                        SidecarMessage::SendResult {
                            request_id,
                            success,
                            error,
                        } => {
                            let outcome = if success {
                                Ok(())
                            } else {
                                Err(error.unwrap_or_else(|| "send rejected".into()))
                            };
                            match reader_pending.remove(&request_id) {
                                Some((_, waiter)) => {
                                    let _ = waiter.send(outcome);
                                },
                                None => debug!(account_id = %reader_account, request_id, "send result for unknown request"),
                            }
                        },
                        SidecarMessage::Error { error } => {
                            warn!(account_id = %reader_account, error, "sidecar error");
                        },
                        other => {
                            let Some(event) = other.into_event(&reader_account) else {
                                continue;
                            };
                            let last = matches!(event, NetworkEvent::Disconnected(_));
                            if events_tx.send(event).await.is_err() || last {
                                break None;
                            }
                        },
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(account_id = %reader_account, "sidecar connection closed");
                    break Some(
                        frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "sidecar connection closed".into()),
                    );
                },
                Some(Ok(_)) => {}, // Ignore ping/pong/binary
                Some(Err(e)) => {
                    error!(account_id = %reader_account, error = %e, "WebSocket read error");
                    break Some(format!("sidecar read error: {e}"));
                },
                None => break Some("sidecar connection closed".into()),
            }
        };

        reader_shutdown.cancel();
        reader_pending.clear();
        if let Some(reason) = reason {
            let _ = events_tx.send(NetworkEvent::Disconnected(reason)).await;
        }
    });

    let client = SidecarClient {
        account_id: account_id.to_string(),
        tx,
        pending,
        send_timeout,
        shutdown,
    };
    (client, events_rx)
}

async fn connect_to_sidecar(url: &str) -> anyhow::Result<Socket> {
    info!(url, "connecting to sidecar");
    let (socket, _) = connect_async(url)
        .await
        .context("failed to connect to sidecar")?;
    debug!(url, "connected to sidecar");
    Ok(socket)
}

/// Try to connect to the sidecar with retries.
async fn connect_with_retry(url: &str, max_retries: u32) -> anyhow::Result<Socket> {
    let mut attempt = 0;
    loop {
        match connect_to_sidecar(url).await {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(e);
                }
                warn!(
                    attempt,
                    max_retries,
                    error = %e,
                    "failed to connect to sidecar, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
        }
    }
}
