//! Google Cloud DNS provider, driven over the Cloud DNS REST API.
use crate::dns::DnsProvider;
use crate::error::{AcmeError, Result};
use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct GoogleCloudDnsProvider {
    project_id: String,
    access_token: String,
    client: reqwest::Client,
}

impl GoogleCloudDnsProvider {
    /// `access_token` is a short-lived OAuth2 bearer token for the
    /// `https://www.googleapis.com/auth/ndev.clouddns.readwrite` scope,
    /// obtained by the caller (application default credentials or a
    /// service account) before constructing the provider.
    pub fn new(project_id: String, access_token: String) -> Self {
        Self {
            project_id,
            access_token,
            client: reqwest::Client::new(),
        }
    }

    fn zone_suffix(fqdn: &str) -> String {
        let parts: Vec<&str> = fqdn.split('.').collect();
        if parts.len() > 2 {
            parts[1..].join(".")
        } else {
            fqdn.to_string()
        }
    }

    async fn managed_zone(&self, fqdn: &str) -> Result<String> {
        let zone_name = Self::zone_suffix(fqdn);
        let api_url = format!(
            "https://dns.googleapis.com/dns/v1/projects/{}/managedZones",
            self.project_id
        );

        let response = self
            .client
            .get(&api_url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        body["managedZones"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|z| {
                z["dnsName"]
                    .as_str()
                    .map(|n| n.trim_end_matches('.') == zone_name)
                    .unwrap_or(false)
            })
            .and_then(|z| z["id"].as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AcmeError::dns(format!("no managed zone found for {fqdn}")))
    }

    async fn change_rrset(&self, zone_id: &str, action: &str, name: &str, value: &str) -> Result<()> {
        let api_url = format!(
            "https://dns.googleapis.com/dns/v1/projects/{}/managedZones/{}/rrsets",
            self.project_id, zone_id
        );

        let changes = serde_json::json!({
            "changes": [{
                "action": action,
                "rrset": {
                    "name": name,
                    "type": "TXT",
                    "ttl": 60,
                    "rrdatas": [format!("\"{value}\"")],
                }
            }]
        });

        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&self.access_token)
            .json(&changes)
            .send()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AcmeError::dns(format!(
                "Cloud DNS {action} failed: {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl DnsProvider for GoogleCloudDnsProvider {
    async fn answer_dns_challenge(&self, fqdn: &str, value: &str) -> Result<()> {
        info!(fqdn, "writing Cloud DNS TXT record");
        let zone_id = self.managed_zone(fqdn).await?;
        let name = format!("_acme-challenge.{fqdn}.");
        debug!(fqdn, value, "upserting Cloud DNS TXT record");
        self.change_rrset(&zone_id, "CREATE", &name, value).await
    }

    async fn delete_acme_challenge_resource_records(&self, fqdn: &str) -> Result<()> {
        info!(fqdn, "removing Cloud DNS TXT record");
        let zone_id = match self.managed_zone(fqdn).await {
            Ok(id) => id,
            Err(_) => return Ok(()),
        };
        let name = format!("_acme-challenge.{fqdn}.");
        match self.change_rrset(&zone_id, "DELETE", &name, "").await {
            Ok(()) => Ok(()),
            Err(_) => Ok(()),
        }
    }

    async fn validate_dns_write_access(&self, zone: &str) -> Result<()> {
        self.managed_zone(zone).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_zone_suffix() {
        assert_eq!(GoogleCloudDnsProvider::zone_suffix("example.com"), "example.com");
        assert_eq!(
            GoogleCloudDnsProvider::zone_suffix("api.cluster1.example.com"),
            "cluster1.example.com"
        );
    }
}
