/// AWS Route53 DNS provider.
use crate::dns::DnsProvider;
use crate::error::{AcmeError, Result};
use async_trait::async_trait;

#[cfg(feature = "dns-route53")]
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};

/// Configuration for the Route53 DNS provider.
#[derive(Debug, Clone, Default)]
pub struct Route53Config {
    /// The ID of the hosted zone where the DNS records will be managed.
    /// Spec's `HOSTED_ZONE_ID` configuration input, used when a cluster's
    /// apex domain maps to more than one hosted zone (the tie-break rule
    /// in §4.1 picks the zone whose ID matches this setting).
    pub hosted_zone_id: String,
    /// Explicit credentials read from the cluster's platform credentials
    /// secret (`aws_access_key_id`/`aws_secret_access_key`). When absent,
    /// the ambient SDK credential chain is used instead.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

pub struct Route53DnsProvider {
    config: Route53Config,
    #[cfg(feature = "dns-route53")]
    client: aws_sdk_route53::Client,
}

impl Route53DnsProvider {
    #[cfg(feature = "dns-route53")]
    pub async fn new(config: Route53Config) -> Self {
        tracing::debug!(hosted_zone_id = %config.hosted_zone_id, "initializing Route53 provider");
        let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let (Some(access_key_id), Some(secret_access_key)) =
            (config.access_key_id.as_deref(), config.secret_access_key.as_deref())
        {
            builder = builder.credentials_provider(aws_sdk_route53::config::Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "certfleet-operator",
            ));
        }
        let sdk_config = builder.load().await;
        let client = aws_sdk_route53::Client::new(&sdk_config);
        Self { config, client }
    }

    #[cfg(not(feature = "dns-route53"))]
    pub fn new(config: Route53Config) -> Self {
        tracing::warn!("Route53DnsProvider initialized but 'dns-route53' feature is disabled");
        Self { config }
    }

    fn fqdn_name(fqdn: &str) -> String {
        if fqdn.ends_with('.') {
            fqdn.to_string()
        } else {
            format!("{fqdn}.")
        }
    }
}

#[async_trait]
impl DnsProvider for Route53DnsProvider {
    async fn answer_dns_challenge(&self, fqdn: &str, value: &str) -> Result<()> {
        tracing::info!(fqdn, "writing Route53 TXT record");
        #[cfg(feature = "dns-route53")]
        {
            let name = Self::fqdn_name(&format!("_acme-challenge.{fqdn}"));

            let change = Change::builder()
                .action(ChangeAction::Upsert)
                .resource_record_set(
                    ResourceRecordSet::builder()
                        .name(&name)
                        .r#type(RrType::Txt)
                        .ttl(60)
                        .resource_records(
                            ResourceRecord::builder()
                                .value(format!("\"{value}\""))
                                .build()
                                .map_err(|e| {
                                    AcmeError::configuration(format!("Route53 build error: {e}"))
                                })?,
                        )
                        .build()
                        .map_err(|e| {
                            AcmeError::configuration(format!("Route53 build error: {e}"))
                        })?,
                )
                .build()
                .map_err(|e| AcmeError::configuration(format!("Route53 build error: {e}")))?;

            let batch = ChangeBatch::builder()
                .changes(change)
                .build()
                .map_err(|e| AcmeError::configuration(format!("Route53 build error: {e}")))?;

            self.client
                .change_resource_record_sets()
                .hosted_zone_id(&self.config.hosted_zone_id)
                .change_batch(batch)
                .send()
                .await
                .map_err(|e| AcmeError::dns(format!("Route53 change error: {e}")))?;

            Ok(())
        }
        #[cfg(not(feature = "dns-route53"))]
        {
            let _ = (fqdn, value, &self.config);
            Err(AcmeError::configuration("Route53 feature not enabled"))
        }
    }

    async fn delete_acme_challenge_resource_records(&self, fqdn: &str) -> Result<()> {
        tracing::info!(fqdn, "removing Route53 TXT record");
        #[cfg(feature = "dns-route53")]
        {
            let name = Self::fqdn_name(&format!("_acme-challenge.{fqdn}"));

            let record_sets = self
                .client
                .list_resource_record_sets()
                .hosted_zone_id(&self.config.hosted_zone_id)
                .start_record_name(&name)
                .start_record_type(RrType::Txt)
                .max_items(1)
                .send()
                .await
                .map_err(|e| AcmeError::dns(format!("Route53 list error: {e}")))?;

            let Some(existing) = record_sets
                .resource_record_sets()
                .iter()
                .find(|rs| rs.name() == name && rs.r#type() == &RrType::Txt)
            else {
                return Ok(());
            };

            let change = Change::builder()
                .action(ChangeAction::Delete)
                .resource_record_set(existing.clone())
                .build()
                .map_err(|e| AcmeError::configuration(format!("Route53 build error: {e}")))?;

            let batch = ChangeBatch::builder()
                .changes(change)
                .build()
                .map_err(|e| AcmeError::configuration(format!("Route53 build error: {e}")))?;

            self.client
                .change_resource_record_sets()
                .hosted_zone_id(&self.config.hosted_zone_id)
                .change_batch(batch)
                .send()
                .await
                .map_err(|e| AcmeError::dns(format!("Route53 delete error: {e}")))?;

            Ok(())
        }
        #[cfg(not(feature = "dns-route53"))]
        {
            let _ = (fqdn, &self.config);
            Err(AcmeError::configuration("Route53 feature not enabled"))
        }
    }

    async fn validate_dns_write_access(&self, zone: &str) -> Result<()> {
        #[cfg(feature = "dns-route53")]
        {
            let zones = self
                .client
                .get_hosted_zone()
                .id(&self.config.hosted_zone_id)
                .send()
                .await
                .map_err(|e| AcmeError::dns(format!("Route53 hosted zone lookup error: {e}")))?;

            let zone_name = zones
                .hosted_zone()
                .map(|z| z.name().trim_end_matches('.').to_string())
                .unwrap_or_default();

            if zone.trim_end_matches('.') == zone_name {
                Ok(())
            } else {
                Err(AcmeError::dns(format!(
                    "hosted zone {} does not match requested zone {zone}",
                    self.config.hosted_zone_id
                )))
            }
        }
        #[cfg(not(feature = "dns-route53"))]
        {
            let _ = zone;
            Err(AcmeError::configuration("Route53 feature not enabled"))
        }
    }
}
