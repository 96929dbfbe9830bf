//! Azure DNS provider, driven over Azure's management REST API.
use crate::dns::DnsProvider;
use crate::error::{AcmeError, Result};
use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AzureDnsProvider {
    subscription_id: String,
    resource_group: String,
    client_id: String,
    client_secret: String,
    tenant_id: String,
    client: reqwest::Client,
}

impl AzureDnsProvider {
    pub fn new(
        subscription_id: String,
        resource_group: String,
        client_id: String,
        client_secret: String,
        tenant_id: String,
    ) -> Self {
        Self {
            subscription_id,
            resource_group,
            client_id,
            client_secret,
            tenant_id,
            client: reqwest::Client::new(),
        }
    }

    async fn get_access_token(&self) -> Result<String> {
        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("scope", "https://management.azure.com/.default"),
        ];

        let form_body = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let response = self
            .client
            .post(&token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form_body)
            .send()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        body["access_token"]
            .as_str()
            .ok_or_else(|| AcmeError::protocol("failed to obtain Azure access token"))
            .map(|s| s.to_string())
    }

    fn zone_name(domain: &str) -> String {
        let parts: Vec<&str> = domain.split('.').collect();
        if parts.len() > 2 {
            parts[1..].join(".")
        } else {
            domain.to_string()
        }
    }

    fn record_name(fqdn: &str, zone: &str) -> String {
        if fqdn == zone {
            "@".to_string()
        } else {
            fqdn.strip_suffix(&format!(".{zone}")).unwrap_or(fqdn).to_string()
        }
    }

    fn record_api_url(&self, zone: &str, record: &str) -> String {
        format!(
            "https://management.azure.com/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/dnsZones/{}/TXT/{}?api-version=2018-05-01",
            self.subscription_id, self.resource_group, zone, record
        )
    }
}

#[async_trait]
impl DnsProvider for AzureDnsProvider {
    async fn answer_dns_challenge(&self, fqdn: &str, value: &str) -> Result<()> {
        info!(fqdn, "writing Azure DNS TXT record");

        let token = self.get_access_token().await?;
        let acme_fqdn = format!("_acme-challenge.{fqdn}");
        let zone = Self::zone_name(fqdn);
        let record = Self::record_name(&acme_fqdn, &zone);
        let api_url = self.record_api_url(&zone, &record);

        let body = serde_json::json!({
            "properties": {
                "TTL": 60,
                "TXTRecords": [{ "value": [value] }]
            }
        });

        debug!(fqdn, value, "PUT Azure DNS TXT record");

        let response = self
            .client
            .put(&api_url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AcmeError::dns(format!(
                "failed to create Azure DNS record: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn delete_acme_challenge_resource_records(&self, fqdn: &str) -> Result<()> {
        info!(fqdn, "removing Azure DNS TXT record");

        let token = self.get_access_token().await?;
        let acme_fqdn = format!("_acme-challenge.{fqdn}");
        let zone = Self::zone_name(fqdn);
        let record = Self::record_name(&acme_fqdn, &zone);
        let api_url = self.record_api_url(&zone, &record);

        let response = self
            .client
            .delete(&api_url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(AcmeError::dns(format!(
                "failed to delete Azure DNS record: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn validate_dns_write_access(&self, zone: &str) -> Result<()> {
        let token = self.get_access_token().await?;
        let api_url = format!(
            "https://management.azure.com/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/dnsZones/{}?api-version=2018-05-01",
            self.subscription_id, self.resource_group, zone
        );

        let response = self
            .client
            .get(&api_url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AcmeError::transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AcmeError::dns(format!(
                "no write access to Azure DNS zone {zone}: {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_zone_and_record_name() {
        assert_eq!(AzureDnsProvider::zone_name("example.com"), "example.com");
        assert_eq!(
            AzureDnsProvider::zone_name("_acme-challenge.api.example.com"),
            "api.example.com"
        );
        assert_eq!(
            AzureDnsProvider::record_name("_acme-challenge.api.example.com", "example.com"),
            "_acme-challenge.api"
        );
    }
}
