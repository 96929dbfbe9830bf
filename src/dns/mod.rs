/// DNS provider driver: writes and tears down the TXT record a DNS-01
/// challenge needs, and checks that the operator has write access to a
/// zone before a ClusterDeployment is admitted.
pub mod factory;
pub mod providers;

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or replace the `_acme-challenge.<fqdn>` TXT record with `value`.
    async fn answer_dns_challenge(&self, fqdn: &str, value: &str) -> Result<()>;

    /// Remove the `_acme-challenge.<fqdn>` TXT record, ignoring not-found.
    async fn delete_acme_challenge_resource_records(&self, fqdn: &str) -> Result<()>;

    /// Confirm the operator can write to `zone` (used by the
    /// ClusterDeployment admission filter before a cluster is accepted).
    async fn validate_dns_write_access(&self, zone: &str) -> Result<()>;
}

pub use factory::{DnsProviderFactory, KubeDnsProviderFactory};
pub use providers::{MockDnsProvider, MockDnsProviderFactory};
#[cfg(feature = "dns-azure")]
pub use providers::AzureDnsProvider;
#[cfg(feature = "dns-google")]
pub use providers::GoogleCloudDnsProvider;
#[cfg(feature = "dns-route53")]
pub use providers::Route53DnsProvider;
