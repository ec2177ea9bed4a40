use {
    async_trait::async_trait,
    wagate_common::{Result, types::Credential},
};

/// A key/value store holding one opaque credential per account.
///
/// Implementations report transport problems as `Error::StoreUnavailable`;
/// callers decide whether that is fatal. A missing key is `Ok(None)`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the latest credential saved for `account_id`.
    async fn fetch(&self, account_id: &str) -> Result<Option<Credential>>;

    /// Replace the credential saved for `account_id`.
    async fn save(&self, account_id: &str, credential: &Credential) -> Result<()>;
}
