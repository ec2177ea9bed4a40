//! Webhook delivery and per-account queues.

use std::time::{Duration, Instant};

use {
    tokio::{
        sync::mpsc::{self, error::TrySendError},
        task::JoinHandle,
    },
    tracing::{Instrument, debug, info_span, warn},
    url::Url,
    wagate_common::{Error, Result},
    wagate_config::WebhookConfig,
};

#[cfg(feature = "metrics")]
use wagate_metrics::{counter, definitions::labels, definitions::webhook as webhook_metrics, histogram};

use crate::payload::WebhookPayload;

/// Result of a single delivery attempt. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The endpoint answered with a non-success status.
    Rejected(u16),
    /// Timeout, connection error or unserializable payload.
    Failed,
}

impl DeliveryOutcome {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Rejected(_) => "rejected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    queue_capacity: usize,
}

impl WebhookDispatcher {
    pub fn new(timeout: Duration, queue_capacity: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::upstream)?;
        Ok(Self {
            client,
            queue_capacity: queue_capacity.max(1),
        })
    }

    pub fn from_config(config: &WebhookConfig) -> Result<Self> {
        Self::new(config.timeout(), config.queue_capacity)
    }

    /// POST `payload` to `url` once. Failures are logged, never returned.
    pub async fn deliver(&self, url: &Url, payload: &WebhookPayload) -> DeliveryOutcome {
        let started = Instant::now();
        let outcome = match self.client.post(url.clone()).json(payload).send().await {
            Ok(resp) if resp.status().is_success() => DeliveryOutcome::Delivered,
            Ok(resp) => {
                let status = resp.status();
                warn!(account_id = %payload.account_id, %url, %status, "webhook rejected event");
                DeliveryOutcome::Rejected(status.as_u16())
            },
            Err(e) => {
                warn!(account_id = %payload.account_id, %url, error = %e, "webhook delivery failed");
                DeliveryOutcome::Failed
            },
        };
        let elapsed = started.elapsed();
        debug!(
            account_id = %payload.account_id,
            outcome = outcome.as_label(),
            elapsed_ms = elapsed.as_millis() as u64,
            "webhook delivery finished"
        );

        #[cfg(feature = "metrics")]
        {
            counter!(webhook_metrics::DELIVERIES_TOTAL, labels::RESULT => outcome.as_label())
                .increment(1);
            histogram!(webhook_metrics::DELIVERY_DURATION_SECONDS).record(elapsed.as_secs_f64());
        }

        outcome
    }

    /// Start the delivery worker for one account.
    ///
    /// Events are posted one at a time in enqueue order. Dropping or draining
    /// the returned queue lets the worker finish its backlog and exit.
    pub fn spawn_worker(&self, account_id: &str, url: Url) -> WebhookQueue {
        let (tx, mut rx) = mpsc::channel::<WebhookPayload>(self.queue_capacity);
        let dispatcher = self.clone();
        let span = info_span!("webhook", account_id, %url);
        let worker = tokio::spawn(
            async move {
                while let Some(payload) = rx.recv().await {
                    dispatcher.deliver(&url, &payload).await;
                }
                debug!("webhook worker stopped");
            }
            .instrument(span),
        );
        WebhookQueue {
            account_id: account_id.to_string(),
            tx,
            worker,
        }
    }
}

/// Sending side of one account's delivery queue.
pub struct WebhookQueue {
    account_id: String,
    tx: mpsc::Sender<WebhookPayload>,
    worker: JoinHandle<()>,
}

impl WebhookQueue {
    /// Queue an event without waiting. Returns false if it was dropped
    /// because the queue is full or the worker is gone.
    pub fn enqueue(&self, payload: WebhookPayload) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(account_id = %self.account_id, "webhook queue full, dropping event");
                #[cfg(feature = "metrics")]
                counter!(webhook_metrics::DROPPED_TOTAL, labels::REASON => "queue_full").increment(1);
                false
            },
            Err(TrySendError::Closed(_)) => {
                warn!(account_id = %self.account_id, "webhook worker gone, dropping event");
                #[cfg(feature = "metrics")]
                counter!(webhook_metrics::DROPPED_TOTAL, labels::REASON => "closed").increment(1);
                false
            },
        }
    }

    /// Close the queue and wait until every queued event was attempted.
    pub async fn drain(self) {
        let Self { tx, worker, .. } = self;
        drop(tx);
        if let Err(e) = worker.await {
            warn!(error = %e, "webhook worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {
        axum::{Json, Router, extract::State, http::StatusCode, routing::post},
        tokio::sync::Notify,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Receiver {
        seen: Arc<Mutex<Vec<(String, String)>>>,
        notify: Arc<Notify>,
    }

    impl Receiver {
        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    async fn record(State(rx): State<Receiver>, Json(body): Json<serde_json::Value>) -> StatusCode {
        let account = body["accountId"].as_str().unwrap_or_default().to_string();
        let text = body["body"].as_str().unwrap_or_default().to_string();
        rx.seen.lock().unwrap().push((account, text));
        rx.notify.notify_waiters();
        StatusCode::OK
    }

    async fn slow() -> StatusCode {
        tokio::time::sleep(Duration::from_secs(30)).await;
        StatusCode::OK
    }

    async fn broken() -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    async fn serve() -> (Url, Receiver) {
        let receiver = Receiver::default();
        let app = Router::new()
            .route("/hook", post(record))
            .route("/slow", post(slow))
            .route("/broken", post(broken))
            .with_state(receiver.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (Url::parse(&format!("http://{addr}/")).unwrap(), receiver)
    }

    fn payload(account: &str, body: &str) -> WebhookPayload {
        WebhookPayload {
            account_id: account.into(),
            from: "1666@c.us".into(),
            body: body.into(),
            message_type: "chat".into(),
            timestamp: 1_700_000_000,
            is_group: false,
            media: None,
        }
    }

    fn dispatcher(timeout: Duration) -> WebhookDispatcher {
        WebhookDispatcher::new(timeout, 16).unwrap()
    }

    #[tokio::test]
    async fn preserves_per_account_order() {
        let (base, receiver) = serve().await;
        let queue = dispatcher(Duration::from_secs(5)).spawn_worker("1555", base.join("hook").unwrap());
        for body in ["m1", "m2", "m3"] {
            assert!(queue.enqueue(payload("1555", body)));
        }
        queue.drain().await;

        let bodies: Vec<_> = receiver.seen().into_iter().map(|(_, b)| b).collect();
        assert_eq!(bodies, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn slow_account_does_not_delay_another() {
        let (base, receiver) = serve().await;
        let d = dispatcher(Duration::from_secs(30));
        let slow_queue = d.spawn_worker("A", base.join("slow").unwrap());
        let fast_queue = d.spawn_worker("B", base.join("hook").unwrap());

        assert!(slow_queue.enqueue(payload("A", "a1")));
        assert!(slow_queue.enqueue(payload("A", "a2")));
        let notified = receiver.notify.notified();
        assert!(fast_queue.enqueue(payload("B", "b1")));

        assert!(
            tokio::time::timeout(Duration::from_secs(2), notified)
                .await
                .is_ok(),
            "account B delivery was held up by account A"
        );
        assert_eq!(receiver.seen(), vec![("B".to_string(), "b1".to_string())]);
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let (base, _) = serve().await;
        let d = dispatcher(Duration::from_millis(200));
        assert_eq!(
            d.deliver(&base.join("broken").unwrap(), &payload("1555", "x")).await,
            DeliveryOutcome::Rejected(500)
        );
        assert_eq!(
            d.deliver(&base.join("slow").unwrap(), &payload("1555", "x")).await,
            DeliveryOutcome::Failed
        );

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = Url::parse(&format!("http://{}/hook", listener.local_addr().unwrap())).unwrap();
        drop(listener);
        assert_eq!(
            d.deliver(&dead, &payload("1555", "x")).await,
            DeliveryOutcome::Failed
        );
    }

    #[tokio::test]
    async fn failed_delivery_does_not_stop_the_queue() {
        let (base, receiver) = serve().await;
        let d = dispatcher(Duration::from_secs(5));
        let broken = d.spawn_worker("1555", base.join("broken").unwrap());
        assert!(broken.enqueue(payload("1555", "lost")));
        broken.drain().await;

        let queue = d.spawn_worker("1555", base.join("hook").unwrap());
        assert!(queue.enqueue(payload("1555", "kept")));
        queue.drain().await;
        assert_eq!(receiver.seen(), vec![("1555".to_string(), "kept".to_string())]);
    }

    #[tokio::test]
    async fn full_queue_drops() {
        let (base, _) = serve().await;
        let d = WebhookDispatcher::new(Duration::from_secs(1), 1).unwrap();
        let queue = d.spawn_worker("1555", base.join("hook").unwrap());
        // The worker has not run yet on this single-threaded runtime.
        assert!(queue.enqueue(payload("1555", "m1")));
        assert!(!queue.enqueue(payload("1555", "m2")));
        queue.drain().await;
    }
}
