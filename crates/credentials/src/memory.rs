use std::collections::HashMap;

use {
    async_trait::async_trait,
    tokio::sync::RwLock,
    wagate_common::{Result, types::Credential},
};

use crate::store::CredentialStore;

/// In-memory store for tests and deployments without a remote store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    data: RwLock<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn fetch(&self, account_id: &str) -> Result<Option<Credential>> {
        Ok(self.data.read().await.get(account_id).cloned())
    }

    async fn save(&self, account_id: &str, credential: &Credential) -> Result<()> {
        self.data
            .write()
            .await
            .insert(account_id.to_string(), credential.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_replaces_previous() {
        let store = MemoryCredentialStore::new();
        assert!(store.fetch("1555").await.unwrap().is_none());

        store
            .save("1555", &Credential::new(serde_json::json!({"v": 1})))
            .await
            .unwrap();
        store
            .save("1555", &Credential::new(serde_json::json!({"v": 2})))
            .await
            .unwrap();

        let got = store.fetch("1555").await.unwrap().unwrap();
        assert_eq!(got.as_value()["v"], 2);
        assert_eq!(store.len().await, 1);
    }
}
