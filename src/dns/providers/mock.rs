/// In-memory DNS provider used by reconciler tests.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::dns::{DnsProvider, DnsProviderFactory};
use crate::error::Result;
use crate::model::Platform;

#[derive(Default)]
pub struct MockDnsProvider {
    records: Arc<RwLock<HashMap<String, String>>>,
    writable_zones: Mutex<HashSet<String>>,
}

impl MockDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `validate_dns_write_access` to succeed only for the given
    /// zones. With no zones registered, every zone is treated as writable.
    pub fn allow_zone(&self, zone: impl Into<String>) -> &Self {
        self.writable_zones.lock().unwrap().insert(zone.into());
        self
    }

    pub async fn record(&self, fqdn: &str) -> Option<String> {
        self.records.read().await.get(fqdn).cloned()
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    async fn answer_dns_challenge(&self, fqdn: &str, value: &str) -> Result<()> {
        self.records
            .write()
            .await
            .insert(format!("_acme-challenge.{fqdn}"), value.to_string());
        Ok(())
    }

    async fn delete_acme_challenge_resource_records(&self, fqdn: &str) -> Result<()> {
        self.records
            .write()
            .await
            .remove(&format!("_acme-challenge.{fqdn}"));
        Ok(())
    }

    async fn validate_dns_write_access(&self, zone: &str) -> Result<()> {
        let zones = self.writable_zones.lock().unwrap();
        if zones.is_empty() || zones.contains(zone) {
            Ok(())
        } else {
            Err(crate::error::AcmeError::dns(format!(
                "no write access to zone {zone}"
            )))
        }
    }
}

/// Hands out the same shared [`MockDnsProvider`] regardless of platform, for
/// reconciler tests that don't exercise per-platform credential resolution.
#[derive(Clone)]
pub struct MockDnsProviderFactory(Arc<MockDnsProvider>);

impl MockDnsProviderFactory {
    pub fn new(inner: Arc<MockDnsProvider>) -> Self {
        Self(inner)
    }
}

#[async_trait]
impl DnsProviderFactory for MockDnsProviderFactory {
    async fn provider_for(&self, _namespace: &str, _platform: &Platform) -> Result<Arc<dyn DnsProvider>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_removes_challenge() {
        let provider = MockDnsProvider::new();
        provider
            .answer_dns_challenge("api.cluster1.example.com", "digest123")
            .await
            .unwrap();
        assert_eq!(
            provider.record("_acme-challenge.api.cluster1.example.com").await,
            Some("digest123".to_string())
        );

        provider
            .delete_acme_challenge_resource_records("api.cluster1.example.com")
            .await
            .unwrap();
        assert_eq!(
            provider.record("_acme-challenge.api.cluster1.example.com").await,
            None
        );
    }
}
