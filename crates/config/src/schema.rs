//! Config schema: HTTP server, credential store, webhook delivery, sidecar bridge.

use std::time::Duration;

use {
    secrecy::Secret,
    serde::Deserialize,
    url::Url,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub credentials: CredentialStoreConfig,
    pub webhook: WebhookConfig,
    pub sidecar: SidecarConfig,
}

/// Command API listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Remote key/value store holding one credential blob per account.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialStoreConfig {
    /// Base URL of the store. When unset, credentials only live in memory.
    pub base_url: Option<Url>,

    /// Bearer token sent with every request.
    pub api_key: Option<Secret<String>>,

    /// Prefix prepended to the account id to build the store key.
    pub key_prefix: String,

    pub timeout_secs: u64,
}

impl CredentialStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CredentialStoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            key_prefix: "whatsapp-session/".into(),
            timeout_secs: 10,
        }
    }
}

/// Outbound webhook delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Used when a session is started without its own webhook URL.
    pub default_url: Option<Url>,
    pub timeout_secs: u64,
    /// Per-account queue depth; events beyond it are dropped.
    pub queue_capacity: usize,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_url: None,
            timeout_secs: 10,
            queue_capacity: 256,
        }
    }
}

/// Address the sidecar listens on when none is configured.
pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:9876";

/// WebSocket bridge to the browser-automation sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub url: String,
    pub connect_retries: u32,
    pub send_timeout_secs: u64,
}

impl SidecarConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIDECAR_URL.into(),
            connect_retries: 3,
            send_timeout_secs: 30,
        }
    }
}
