/// Resolves a `DnsProvider` at reconcile time from a `CertificateRequest`'s
/// platform tag, per spec §4.1: "The driver is resolved at reconcile-time
/// from the cluster's platform tag; credentials come from a secret
/// referenced by the CertificateRequest."
use crate::error::{AcmeError, Result};
use crate::model::Platform;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::Api;
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::DnsProvider;

#[cfg(feature = "dns-azure")]
use super::providers::azure::AzureDnsProvider;
#[cfg(feature = "dns-google")]
use super::providers::google::GoogleCloudDnsProvider;
#[cfg(feature = "dns-route53")]
use super::providers::route53::{Route53Config, Route53DnsProvider};

#[async_trait]
pub trait DnsProviderFactory: Send + Sync {
    async fn provider_for(&self, namespace: &str, platform: &Platform) -> Result<Arc<dyn DnsProvider>>;
}

/// Builds a real cloud DNS provider per reconcile, reading per-cluster
/// credentials from the secret named by `Platform`'s `CredentialsRef` in
/// the CertificateRequest's own namespace. Falls back to the in-memory
/// mock (with a warning) when the matching provider feature was compiled
/// out, the same degrade-gracefully style `route53.rs` uses internally.
#[derive(Clone)]
pub struct KubeDnsProviderFactory {
    client: Client,
    hosted_zone_id: Option<String>,
}

impl KubeDnsProviderFactory {
    pub fn new(client: Client, hosted_zone_id: Option<String>) -> Self {
        Self { client, hosted_zone_id }
    }

    async fn credentials(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await.map_err(AcmeError::Kube)?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, ByteString(bytes))| (k, String::from_utf8_lossy(&bytes).into_owned()))
            .collect())
    }

    fn field(creds: &BTreeMap<String, String>, key: &str) -> Result<String> {
        creds
            .get(key)
            .cloned()
            .ok_or_else(|| AcmeError::configuration(format!("credentials secret missing key {key}")))
    }
}

#[async_trait]
impl DnsProviderFactory for KubeDnsProviderFactory {
    async fn provider_for(&self, namespace: &str, platform: &Platform) -> Result<Arc<dyn DnsProvider>> {
        match platform {
            Platform::Aws { credentials, .. } => {
                let creds = self.credentials(namespace, &credentials.name).await?;
                let access_key_id = Self::field(&creds, "aws_access_key_id")?;
                let secret_access_key = Self::field(&creds, "aws_secret_access_key")?;

                #[cfg(feature = "dns-route53")]
                {
                    let provider = Route53DnsProvider::new(Route53Config {
                        hosted_zone_id: self.hosted_zone_id.clone().unwrap_or_default(),
                        access_key_id: Some(access_key_id),
                        secret_access_key: Some(secret_access_key),
                    })
                    .await;
                    Ok(Arc::new(provider))
                }
                #[cfg(not(feature = "dns-route53"))]
                {
                    let _ = (access_key_id, secret_access_key);
                    tracing::warn!("dns-route53 feature disabled, falling back to the in-memory mock provider");
                    Ok(Arc::new(super::MockDnsProvider::new()))
                }
            }
            Platform::Gcp { credentials } => {
                let creds = self.credentials(namespace, &credentials.name).await?;
                let project_id = Self::field(&creds, "project_id")?;
                let access_token = Self::field(&creds, "access_token")?;

                #[cfg(feature = "dns-google")]
                {
                    Ok(Arc::new(GoogleCloudDnsProvider::new(project_id, access_token)))
                }
                #[cfg(not(feature = "dns-google"))]
                {
                    let _ = (project_id, access_token);
                    tracing::warn!("dns-google feature disabled, falling back to the in-memory mock provider");
                    Ok(Arc::new(super::MockDnsProvider::new()))
                }
            }
            Platform::Azure {
                credentials,
                resource_group,
            } => {
                let creds = self.credentials(namespace, &credentials.name).await?;
                let subscription_id = Self::field(&creds, "subscription_id")?;
                let client_id = Self::field(&creds, "client_id")?;
                let client_secret = Self::field(&creds, "client_secret")?;
                let tenant_id = Self::field(&creds, "tenant_id")?;

                #[cfg(feature = "dns-azure")]
                {
                    Ok(Arc::new(AzureDnsProvider::new(
                        subscription_id,
                        resource_group.clone(),
                        client_id,
                        client_secret,
                        tenant_id,
                    )))
                }
                #[cfg(not(feature = "dns-azure"))]
                {
                    let _ = (subscription_id, resource_group, client_id, client_secret, tenant_id);
                    tracing::warn!("dns-azure feature disabled, falling back to the in-memory mock provider");
                    Ok(Arc::new(super::MockDnsProvider::new()))
                }
            }
        }
    }
}
