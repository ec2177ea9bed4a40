//! Credential store backed by a remote HTTP key/value service.
//!
//! Keys are `<key_prefix><account_id>`, percent-encoded into a single path
//! segment under the base URL. `GET` reads the latest blob (404 means none),
//! `PUT` replaces it.

use {
    async_trait::async_trait,
    reqwest::StatusCode,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
    url::Url,
    wagate_common::{Error, Result, types::Credential},
    wagate_config::CredentialStoreConfig,
};

#[cfg(feature = "metrics")]
use wagate_metrics::{counter, definitions::credentials as cred_metrics, definitions::labels};

use crate::store::CredentialStore;

pub struct HttpCredentialStore {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<Secret<String>>,
    key_prefix: String,
}

impl HttpCredentialStore {
    pub fn new(
        base_url: Url,
        api_key: Option<Secret<String>>,
        key_prefix: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::store)?;
        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            api_key,
            key_prefix: key_prefix.into(),
        })
    }

    /// Build from config; `None` when no base URL is configured.
    pub fn from_config(config: &CredentialStoreConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.base_url.clone() else {
            return Ok(None);
        };
        Self::new(
            base_url,
            config.api_key.clone(),
            config.key_prefix.clone(),
            config.timeout(),
        )
        .map(Some)
    }

    fn key_url(&self, account_id: &str) -> Result<Url> {
        let key = format!("{}{account_id}", self.key_prefix);
        self.base_url
            .join(&urlencoding::encode(&key))
            .map_err(|e| Error::store(format!("invalid store key {key}: {e}")))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key.expose_secret()),
            None => req,
        }
    }

    async fn try_fetch(&self, account_id: &str) -> Result<Option<Credential>> {
        let url = self.key_url(account_id)?;
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(Error::store)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let credential = response.json::<Credential>().await.map_err(Error::store)?;
                Ok(Some(credential))
            },
            status => Err(Error::store(format!("store returned {status}"))),
        }
    }

    async fn try_save(&self, account_id: &str, credential: &Credential) -> Result<()> {
        let url = self.key_url(account_id)?;
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(credential)
            .send()
            .await
            .map_err(Error::store)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(account_id, %status, "credential store rejected save: {body}");
            return Err(Error::store(format!("store returned {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for HttpCredentialStore {
    async fn fetch(&self, account_id: &str) -> Result<Option<Credential>> {
        let result = self.try_fetch(account_id).await;
        match &result {
            Ok(Some(_)) => debug!(account_id, "credential fetched from store"),
            Ok(None) => debug!(account_id, "no stored credential"),
            Err(e) => warn!(account_id, error = %e, "credential fetch failed"),
        }
        #[cfg(feature = "metrics")]
        counter!(
            cred_metrics::OPERATIONS_TOTAL,
            labels::OPERATION => "fetch",
            labels::RESULT => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    async fn save(&self, account_id: &str, credential: &Credential) -> Result<()> {
        let result = self.try_save(account_id, credential).await;
        match &result {
            Ok(()) => debug!(account_id, "credential saved to store"),
            Err(e) => warn!(account_id, error = %e, "credential save failed"),
        }
        #[cfg(feature = "metrics")]
        counter!(
            cred_metrics::OPERATIONS_TOTAL,
            labels::OPERATION => "save",
            labels::RESULT => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
