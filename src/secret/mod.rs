//! Certificate secret storage: the `SecretStore` trait abstracts over a
//! real Kubernetes `Secret` and an in-memory fake used in tests.
pub mod kube_store;
pub mod memory;

pub use kube_store::KubeSecretStore;
pub use memory::MemorySecretStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label set on every secret this operator writes, enabling discovery per
/// spec §6 ("Label `certificate_request=<name>` on the secret").
pub const CERTIFICATE_REQUEST_LABEL: &str = "certificate_request";

/// The certificate secret layout from spec §6: `tls.crt`, `tls.key`,
/// `letsencrypt-account-url`, `letsencrypt-account-private-key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateSecret {
    pub tls_crt: Option<String>,
    pub tls_key: Option<String>,
    pub letsencrypt_account_url: Option<String>,
    pub letsencrypt_account_private_key: Option<String>,
}

impl CertificateSecret {
    pub fn has_certificate(&self) -> bool {
        self.tls_crt.is_some() && self.tls_key.is_some()
    }

    pub fn has_account(&self) -> bool {
        self.letsencrypt_account_url.is_some() && self.letsencrypt_account_private_key.is_some()
    }

    pub(crate) fn from_string_map(map: &BTreeMap<String, String>) -> Self {
        Self {
            tls_crt: map.get("tls.crt").cloned(),
            tls_key: map.get("tls.key").cloned(),
            letsencrypt_account_url: map.get("letsencrypt-account-url").cloned(),
            letsencrypt_account_private_key: map.get("letsencrypt-account-private-key").cloned(),
        }
    }

    pub(crate) fn to_string_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(v) = &self.tls_crt {
            map.insert("tls.crt".to_string(), v.clone());
        }
        if let Some(v) = &self.tls_key {
            map.insert("tls.key".to_string(), v.clone());
        }
        if let Some(v) = &self.letsencrypt_account_url {
            map.insert("letsencrypt-account-url".to_string(), v.clone());
        }
        if let Some(v) = &self.letsencrypt_account_private_key {
            map.insert("letsencrypt-account-private-key".to_string(), v.clone());
        }
        map
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CertificateSecret>>;

    /// Create or replace the secret, labeling it
    /// `certificate_request=<owner_certificate_request>` for discovery.
    async fn put(
        &self,
        namespace: &str,
        name: &str,
        owner_certificate_request: &str,
        secret: &CertificateSecret,
    ) -> Result<()>;

    /// Idempotent: deleting an already-absent secret is not an error.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}
