use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use {
    axum::{
        Router,
        routing::{delete, get, post},
    },
    tower_http::cors::{Any, CorsLayer},
    tracing::{info, warn},
    wagate_config::{GatewayConfig, ServerConfig},
    wagate_credentials::{CredentialStore, HttpCredentialStore, MemoryCredentialStore},
    wagate_sessions::SessionRegistry,
    wagate_webhook::WebhookDispatcher,
    wagate_whatsapp::SidecarNetwork,
};

#[cfg(feature = "prometheus")]
use wagate_metrics::recorder::PrometheusHandle;

use crate::routes;

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    #[cfg(feature = "prometheus")]
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            #[cfg(feature = "prometheus")]
            metrics: None,
        }
    }

    #[cfg(feature = "prometheus")]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Wire the registry to the sidecar network, credential store and webhooks
/// described by `config`.
pub fn build_registry(config: &GatewayConfig) -> anyhow::Result<Arc<SessionRegistry>> {
    let store: Arc<dyn CredentialStore> = match HttpCredentialStore::from_config(&config.credentials)? {
        Some(store) => {
            info!(key_prefix = %config.credentials.key_prefix, "using remote credential store");
            Arc::new(store)
        },
        None => {
            warn!("no credential store configured, credentials will not survive a restart");
            Arc::new(MemoryCredentialStore::new())
        },
    };
    let network = Arc::new(SidecarNetwork::from_config(&config.sidecar));
    let dispatcher = WebhookDispatcher::from_config(&config.webhook)?;

    Ok(Arc::new(
        SessionRegistry::new(network, store, dispatcher)
            .with_default_webhook(config.webhook.default_url.clone()),
    ))
}

/// Build the API router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(routes::health))
        .route(
            "/sessions",
            get(routes::list_sessions).post(routes::start_session),
        )
        .route("/sessions/{account_id}", delete(routes::stop_session))
        .route("/sessions/{account_id}/qr", get(routes::qr_status))
        .route("/sessions/{account_id}/auth", get(routes::auth_status))
        .route("/messages/text", post(routes::send_text))
        .route("/messages/media", post(routes::send_media))
        .route("/messages/structured", post(routes::send_structured))
        .route("/presence", post(routes::send_presence));

    #[cfg(feature = "prometheus")]
    let router = router.route("/metrics", get(routes::metrics));

    router.layer(cors).with_state(state)
}

/// Socket address for `server.bind` (IPv4 or IPv6 literal) and `server.port`.
fn listen_addr(server: &ServerConfig) -> anyhow::Result<SocketAddr> {
    let ip: IpAddr = server
        .bind
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {:?}: {e}", server.bind))?;
    Ok(SocketAddr::new(ip, server.port))
}

/// Start the HTTP server and run until Ctrl-C / SIGTERM.
pub async fn start_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    let registry = build_registry(&config)?;

    #[allow(unused_mut)]
    let mut state = AppState::new(Arc::clone(&registry));
    #[cfg(feature = "prometheus")]
    match wagate_metrics::recorder::install_prometheus_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder not installed"),
    }

    let app = build_app(state);
    let addr = listen_addr(&config.server)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        sidecar = %config.sidecar.url,
        "wagate listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down sessions");
    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        reqwest::StatusCode,
        serde_json::{Value, json},
        wagate_common::types::{AuthState, PresenceAction},
        wagate_whatsapp::{
            ChatNetwork, NetworkEvent,
            mock::{MockClient, MockNetwork, SentMessage},
        },
    };

    use super::*;

    struct Harness {
        base: String,
        http: reqwest::Client,
        network: Arc<MockNetwork>,
        registry: Arc<SessionRegistry>,
    }

    impl Harness {
        async fn new() -> Self {
            let network = MockNetwork::new();
            let registry = Arc::new(SessionRegistry::new(
                Arc::clone(&network) as Arc<dyn ChatNetwork>,
                Arc::new(MemoryCredentialStore::new()),
                WebhookDispatcher::new(Duration::from_secs(1), 8).unwrap(),
            ));
            let app = build_app(AppState::new(Arc::clone(&registry)));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            Self {
                base: format!("http://{addr}"),
                http: reqwest::Client::new(),
                network,
                registry,
            }
        }

        async fn get(&self, path: &str) -> (StatusCode, Value) {
            let resp = self
                .http
                .get(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap();
            (resp.status(), resp.json().await.unwrap())
        }

        async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
            let resp = self
                .http
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            (resp.status(), resp.json().await.unwrap())
        }

        async fn delete(&self, path: &str) -> (StatusCode, Value) {
            let resp = self
                .http
                .delete(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap();
            (resp.status(), resp.json().await.unwrap())
        }

        /// Start `account_id` and drive it to `Authenticated`.
        async fn authenticated(&self, account_id: &str) -> Arc<MockClient> {
            let (status, _) = self
                .post("/sessions", json!({"accountId": account_id}))
                .await;
            assert_eq!(status, StatusCode::OK);
            let client = self.network.wait_for_open(account_id, 1).await.unwrap();
            self.network.emit(account_id, NetworkEvent::Ready).await;
            self.wait_for(account_id, AuthState::Authenticated).await;
            client
        }

        async fn wait_for(&self, account_id: &str, want: AuthState) {
            let session = self.registry.get(account_id).await.unwrap();
            let mut rx = session.connection().subscribe();
            tokio::time::timeout(
                Duration::from_secs(2),
                rx.wait_for(|s| s.auth_state() == want),
            )
            .await
            .unwrap()
            .unwrap();
        }
    }

    #[test]
    fn listen_addr_accepts_ipv4_and_ipv6() {
        let server = |bind: &str| ServerConfig {
            bind: bind.into(),
            port: 3000,
        };
        assert_eq!(
            listen_addr(&server("0.0.0.0")).unwrap().to_string(),
            "0.0.0.0:3000"
        );
        assert_eq!(listen_addr(&server("::1")).unwrap().to_string(), "[::1]:3000");
        assert_eq!(listen_addr(&server("[::]")).unwrap().to_string(), "[::]:3000");
        assert!(listen_addr(&server("localhost")).is_err());
    }

    #[tokio::test]
    async fn health_reports_sessions() {
        let h = Harness::new().await;
        let (status, body) = h.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn start_session_validates_and_is_idempotent() {
        let h = Harness::new().await;

        let (status, body) = h.post("/sessions", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "invalid request: accountId is required"}));

        let (status, _) = h
            .post("/sessions", json!({"accountId": "1555", "webhookURL": "not a url"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h
            .post("/sessions", json!({"accountId": "1555", "webhookURL": "http://x/hook"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");
        let (status, _) = h.post("/sessions", json!({"accountId": "1555"})).await;
        assert_eq!(status, StatusCode::OK);

        h.network.wait_for_open("1555", 1).await.unwrap();
        let (_, list) = h.get("/sessions").await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["accountId"], "1555");
        assert_eq!(list[0]["webhookUrl"], "http://x/hook");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let h = Harness::new().await;
        let resp = h
            .http
            .post(format!("{}/messages/text", h.base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn qr_and_auth_status() {
        let h = Harness::new().await;
        let (_, body) = h.get("/sessions/1555/qr").await;
        assert_eq!(body, json!({"status": "not_initialized"}));
        let (status, _) = h.get("/sessions/1555/auth").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.post("/sessions", json!({"accountId": "1555"})).await;
        h.network.wait_for_open("1555", 1).await.unwrap();
        let (_, body) = h.get("/sessions/1555/auth").await;
        assert_eq!(body, json!({"accountId": "1555", "authState": "uninitialized"}));

        h.network.emit("1555", NetworkEvent::Qr("2@pair".into())).await;
        h.wait_for("1555", AuthState::AwaitingScan).await;
        let (_, body) = h.get("/sessions/1555/qr").await;
        assert_eq!(body["status"], "scan");
        assert!(
            body["qrImage"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );

        h.network.emit("1555", NetworkEvent::Ready).await;
        h.wait_for("1555", AuthState::Authenticated).await;
        let (_, body) = h.get("/sessions/1555/qr").await;
        assert_eq!(body, json!({"status": "authenticated"}));
        let (_, body) = h.get("/sessions/1555/auth").await;
        assert_eq!(body["authState"], "authenticated");
    }

    #[tokio::test]
    async fn send_message_requires_authentication() {
        let h = Harness::new().await;
        let req = json!({"accountId": "1555", "to": "1666", "text": "hi"});

        let (status, _) = h.post("/messages/text", req.clone()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.post("/sessions", json!({"accountId": "1555"})).await;
        let client = h.network.wait_for_open("1555", 1).await.unwrap();
        h.network.emit("1555", NetworkEvent::Qr("2@pair".into())).await;
        h.wait_for("1555", AuthState::AwaitingScan).await;

        let (status, body) = h.post("/messages/text", req.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Unauthenticated"}));
        // Field errors are reported only once the session can send.
        let (status, _) = h.post("/messages/text", json!({"accountId": "1555"})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(client.sent().is_empty());

        h.network.emit("1555", NetworkEvent::Ready).await;
        h.wait_for("1555", AuthState::Authenticated).await;
        let (status, body) = h.post("/messages/text", req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        assert_eq!(client.sent(), vec![SentMessage::Text {
            to: "1666@c.us".into(),
            text: "hi".into(),
        }]);

        let (status, _) = h
            .post("/messages/text", json!({"accountId": "1555", "to": "1666"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_failure_is_server_error() {
        let h = Harness::new().await;
        let client = h.authenticated("1555").await;
        client.fail_sends(true);
        let (status, body) = h
            .post("/messages/text", json!({"accountId": "1555", "to": "1666", "text": "hi"}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "upstream failure: mock send failure");
    }

    #[tokio::test]
    async fn send_media() {
        let h = Harness::new().await;
        let client = h.authenticated("1555").await;

        let (status, _) = h
            .post(
                "/messages/media",
                json!({"accountId": "1555", "to": "1666", "mimeType": "image/png", "mediaBase64": "%%%"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post(
                "/messages/media",
                json!({
                    "accountId": "1555",
                    "to": "+1 666",
                    "mimeType": "image/png",
                    "mediaBase64": "cG5n",
                    "caption": ""
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let sent = client.sent();
        let [SentMessage::Media { to, media }] = sent.as_slice() else {
            panic!("expected one media send, got {sent:?}");
        };
        assert_eq!(to, "1666@c.us");
        assert_eq!(&media.data[..], b"png");
        assert_eq!(media.caption, None);
    }

    #[tokio::test]
    async fn send_structured() {
        let h = Harness::new().await;
        let client = h.authenticated("1555").await;

        let (status, body) = h
            .post(
                "/messages/structured",
                json!({"accountId": "1555", "to": "1666", "kind": "carousel", "payload": {}}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid request: unknown structured kind: carousel");

        let (status, _) = h
            .post(
                "/messages/structured",
                json!({
                    "accountId": "1555",
                    "to": "1666",
                    "kind": "buttons",
                    "payload": {"body": "Pick one", "buttons": ["Yes", {"id": "n", "body": "No"}]}
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(
            client.sent().as_slice(),
            [SentMessage::Structured { .. }]
        ));
    }

    #[tokio::test]
    async fn presence_actions() {
        let h = Harness::new().await;
        let client = h.authenticated("1555").await;

        let (status, body) = h
            .post("/presence", json!({"accountId": "1555", "to": "1666", "action": "dancing"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid request: unknown presence action: dancing");

        let (status, _) = h
            .post("/presence", json!({"accountId": "1555", "to": "1666", "action": "typing"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(client.sent(), vec![SentMessage::Presence {
            to: "1666@c.us".into(),
            action: PresenceAction::Typing,
        }]);
    }

    #[tokio::test]
    async fn stop_session_route() {
        let h = Harness::new().await;
        let client = h.authenticated("1555").await;

        let (status, body) = h.delete("/sessions/1555").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "stopped"}));
        assert!(client.is_closed());

        let (status, _) = h.delete("/sessions/1555").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = h.get("/sessions/1555/qr").await;
        assert_eq!(body["status"], "not_initialized");
    }
}
