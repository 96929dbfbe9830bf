use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Platform;

/// Default value for `spec.reissueBeforeDays` when the field is absent:
/// reissue once the current certificate's remaining validity drops below
/// 45 days.
pub const DEFAULT_REISSUE_BEFORE_DAYS: u32 = 45;

fn default_reissue_before_days() -> u32 {
    DEFAULT_REISSUE_BEFORE_DAYS
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CertificateSecretRef {
    pub name: String,
}

/// `certman.managed.openshift.io/v1alpha1, Kind=CertificateRequest`.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "certman.managed.openshift.io",
    version = "v1alpha1",
    kind = "CertificateRequest",
    namespaced,
    status = "CertificateRequestStatus",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// Domains the issued certificate must cover. Must be non-empty; an
    /// empty list is a spec error (§7), not a transient one.
    pub dns_names: Vec<String>,
    /// The delegated ACME DNS zone, e.g. `acme.example.com`. Every entry
    /// in `dns_names` must be a subdomain of this zone or a spec error is
    /// raised rather than attempting issuance.
    pub acme_dns_domain: String,
    pub email: String,
    pub certificate_secret: CertificateSecretRef,
    #[serde(default = "default_reissue_before_days")]
    pub reissue_before_days: u32,
    pub platform: Platform,
    #[serde(default, rename = "apiURL")]
    pub api_url: Option<String>,
    #[serde(default, rename = "webConsoleURL")]
    pub web_console_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    #[serde(default)]
    pub issued: bool,
    #[serde(default)]
    pub issuer_name: Option<String>,
    #[serde(default)]
    pub not_before: Option<String>,
    #[serde(default)]
    pub not_after: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Coarse state, mirrored from the reconciler's internal state machine:
    /// one of `NeedsIssue`, `Issuing`, `Issued`, `NeedsReissue`, `Error`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conditions: Vec<super::Condition>,
}

pub const FINALIZER: &str = "certman.managed.openshift.io/certificate-request";

impl CertificateRequest {
    pub fn reissue_before_days(&self) -> u32 {
        self.spec.reissue_before_days
    }
}
