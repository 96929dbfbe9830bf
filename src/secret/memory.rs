/// In-memory `SecretStore`, for reconciler tests without a cluster.
use super::{CertificateSecret, SecretStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    data: Arc<RwLock<HashMap<(String, String), CertificateSecret>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CertificateSecret>> {
        let data = self.data.read().await;
        Ok(data.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn put(
        &self,
        namespace: &str,
        name: &str,
        _owner_certificate_request: &str,
        secret: &CertificateSecret,
    ) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert((namespace.to_string(), name.to_string()), secret.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut data = self.data.write().await;
        data.remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_certificate_secret() {
        let store = MemorySecretStore::new();
        let secret = CertificateSecret {
            tls_crt: Some("cert".to_string()),
            tls_key: Some("key".to_string()),
            letsencrypt_account_url: None,
            letsencrypt_account_private_key: None,
        };

        store.put("ns", "my-cert", "owner", &secret).await.unwrap();
        let fetched = store.get("ns", "my-cert").await.unwrap().unwrap();
        assert!(fetched.has_certificate());
        assert!(!fetched.has_account());

        store.delete("ns", "my-cert").await.unwrap();
        assert!(store.get("ns", "my-cert").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_missing_secret_is_not_an_error() {
        let store = MemorySecretStore::new();
        assert!(store.delete("ns", "missing").await.is_ok());
    }
}
