/// Built-in DNS provider drivers, one per supported ClusterDeployment platform.
#[cfg(feature = "dns-azure")]
pub mod azure;
#[cfg(feature = "dns-google")]
pub mod google;
pub mod mock;
#[cfg(feature = "dns-route53")]
pub mod route53;

#[cfg(feature = "dns-azure")]
pub use azure::AzureDnsProvider;
#[cfg(feature = "dns-google")]
pub use google::GoogleCloudDnsProvider;
pub use mock::{MockDnsProvider, MockDnsProviderFactory};
#[cfg(feature = "dns-route53")]
pub use route53::Route53DnsProvider;
