use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Names the Kubernetes `Secret` holding a cluster's per-platform
/// credentials, read from the `CertificateRequest`'s own namespace at
/// reconcile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CredentialsRef {
    pub name: String,
}

/// The cloud platform a cluster runs on, carrying the per-platform data
/// needed to resolve a `DnsProvider` for it at reconcile time: which
/// credentials secret to read, and any platform-specific addressing
/// (region, resource group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Platform {
    Aws {
        region: String,
        credentials: CredentialsRef,
    },
    Gcp {
        credentials: CredentialsRef,
    },
    Azure {
        credentials: CredentialsRef,
        resource_group: String,
    },
}

impl Platform {
    pub fn credentials(&self) -> &CredentialsRef {
        match self {
            Platform::Aws { credentials, .. } => credentials,
            Platform::Gcp { credentials } => credentials,
            Platform::Azure { credentials, .. } => credentials,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Aws { .. } => write!(f, "AWS"),
            Platform::Gcp { .. } => write!(f, "GCP"),
            Platform::Azure { .. } => write!(f, "Azure"),
        }
    }
}

/// A control-plane certificate bundle referenced by name, with its own
/// extra domain (e.g. `anotherapi.example.com`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdditionalCertificate {
    pub name: String,
    pub domain: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ServingCertificates {
    /// Name of the `CertificateBundle` that covers the API server domain.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub additional: Vec<AdditionalCertificate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ControlPlaneConfig {
    #[serde(default, rename = "servingCertificates")]
    pub serving_certificates: Option<ServingCertificates>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IngressConfig {
    pub name: String,
    pub domain: String,
    #[serde(rename = "servingCertificate")]
    pub serving_certificate: String,
}

/// A named bundle of one or more ingress/API domains that share a single
/// issued certificate and secret. Referenced by name from
/// `ClusterDeployment.spec.certificateBundles` and consumed by
/// `domains_for_bundle`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CertificateBundle {
    pub name: String,
    #[serde(default, rename = "generate")]
    pub generate: bool,
    #[serde(rename = "certificateSecretRef")]
    pub certificate_secret_ref: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClusterDeploymentStatus {
    #[serde(default)]
    pub conditions: Vec<super::Condition>,
}

/// `hive.openshift.io/v1, Kind=ClusterDeployment` (a subset of the real
/// Hive CRD: only the fields the fleet certificate manager reads).
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterDeployment",
    namespaced,
    status = "ClusterDeploymentStatus",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentSpec {
    pub base_domain: String,
    pub platform: Platform,
    #[serde(default)]
    pub control_plane_config: ControlPlaneConfig,
    #[serde(default)]
    pub ingress: Vec<IngressConfig>,
    #[serde(default)]
    pub certificate_bundles: Vec<CertificateBundle>,
    #[serde(default)]
    pub installed: bool,
}

pub const MANAGED_LABEL: &str = "hive.openshift.io/cluster-platform";
pub const RELOCATE_ANNOTATION: &str = "hive.openshift.io/relocate";
pub const FAKE_CLUSTER_ANNOTATION: &str = "hive.openshift.io/fake-cluster";
pub const FINALIZER: &str = "certman.managed.openshift.io/certificates";

impl ClusterDeployment {
    /// The admission filter from the reconciler design notes: skip
    /// clusters that aren't labeled managed, are mid-relocation, or are
    /// synthetic fixtures used for testing Hive itself.
    pub fn is_admitted(&self) -> bool {
        let labels = self.metadata.labels.as_ref();
        let annotations = self.metadata.annotations.as_ref();

        let managed = labels.map(|l| l.contains_key(MANAGED_LABEL)).unwrap_or(false);
        let relocating = annotations
            .map(|a| a.contains_key(RELOCATE_ANNOTATION))
            .unwrap_or(false);
        let fake = annotations
            .map(|a| a.contains_key(FAKE_CLUSTER_ANNOTATION))
            .unwrap_or(false);

        managed && !relocating && !fake
    }
}

/// Pure function implementing `DomainsForBundle(cb, cd)`: the set of DNS
/// names a named certificate bundle should cover.
///
/// - If the bundle is the cluster's default serving certificate, covers
///   `api.<clusterName>.<baseDomain>`, plus `<extraRecord>.<clusterName>.<baseDomain>`
///   when `extra_record` is non-empty.
/// - Covers the `domain` of every `Additional` entry naming this bundle.
/// - Covers every `Ingress` entry whose `servingCertificate` names this
///   bundle: its domain as-is if already wildcarded, else `*.<domain>`.
///
/// Returns a deduplicated, order-insensitive (sorted) list.
pub fn domains_for_bundle(
    cd: &ClusterDeployment,
    bundle: &CertificateBundle,
    extra_record: Option<&str>,
) -> Vec<String> {
    use kube::ResourceExt;

    let cluster_name = cd.name_any();
    let spec = &cd.spec;
    let mut domains = Vec::new();

    let is_default = spec
        .control_plane_config
        .serving_certificates
        .as_ref()
        .and_then(|sc| sc.default.as_deref())
        == Some(bundle.name.as_str());
    if is_default {
        domains.push(format!("api.{cluster_name}.{}", spec.base_domain));
        if let Some(extra) = extra_record.filter(|e| !e.is_empty()) {
            domains.push(format!("{extra}.{cluster_name}.{}", spec.base_domain));
        }
    }

    if let Some(serving) = spec.control_plane_config.serving_certificates.as_ref() {
        for additional in serving.additional.iter().filter(|a| a.name == bundle.name) {
            domains.push(additional.domain.clone());
        }
    }

    for ingress in spec.ingress.iter().filter(|i| i.serving_certificate == bundle.name) {
        if ingress.domain.starts_with("*.") {
            domains.push(ingress.domain.clone());
        } else {
            domains.push(format!("*.{}", ingress.domain));
        }
    }

    domains.sort();
    domains.dedup();
    domains
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    fn cd(spec: ClusterDeploymentSpec) -> ClusterDeployment {
        let mut cd = ClusterDeployment::new("foo", spec);
        cd.meta_mut().namespace = Some("ns".to_string());
        cd
    }

    fn spec() -> ClusterDeploymentSpec {
        ClusterDeploymentSpec {
            base_domain: "example.com".to_string(),
            platform: Platform::Aws {
                region: "us-east-1".to_string(),
                credentials: CredentialsRef {
                    name: "aws-iam-secret".to_string(),
                },
            },
            control_plane_config: ControlPlaneConfig {
                serving_certificates: Some(ServingCertificates {
                    default: Some("testbundle".to_string()),
                    additional: vec![],
                }),
            },
            ingress: vec![],
            certificate_bundles: vec![],
            installed: true,
        }
    }

    fn testbundle() -> CertificateBundle {
        CertificateBundle {
            name: "testbundle".to_string(),
            generate: true,
            certificate_secret_ref: "bs".to_string(),
        }
    }

    #[test]
    fn default_bundle_covers_api_domain() {
        let cluster = cd(spec());
        let domains = domains_for_bundle(&cluster, &testbundle(), None);
        assert_eq!(domains, vec!["api.foo.example.com".to_string()]);
    }

    #[test]
    fn default_bundle_also_covers_additional_and_wildcarded_ingress() {
        let mut s = spec();
        s.control_plane_config.serving_certificates.as_mut().unwrap().additional =
            vec![AdditionalCertificate {
                name: "testbundle".to_string(),
                domain: "anotherapi.example.com".to_string(),
            }];
        s.ingress = vec![IngressConfig {
            name: "default".to_string(),
            domain: "apps.example.com".to_string(),
            serving_certificate: "testbundle".to_string(),
        }];
        let cluster = cd(s);
        let mut domains = domains_for_bundle(&cluster, &testbundle(), None);
        domains.sort();
        let mut expected = vec![
            "api.foo.example.com".to_string(),
            "anotherapi.example.com".to_string(),
            "*.apps.example.com".to_string(),
        ];
        expected.sort();
        assert_eq!(domains, expected);
    }

    #[test]
    fn extra_record_env_adds_second_api_domain() {
        let cluster = cd(spec());
        let domains = domains_for_bundle(&cluster, &testbundle(), Some("myapi"));
        assert_eq!(
            domains,
            vec!["api.foo.example.com".to_string(), "myapi.foo.example.com".to_string()]
        );
    }

    #[test]
    fn non_default_bundle_with_no_matches_is_empty() {
        let cluster = cd(spec());
        let other = CertificateBundle {
            name: "other".to_string(),
            generate: true,
            certificate_secret_ref: "other-cert".to_string(),
        };
        assert_eq!(domains_for_bundle(&cluster, &other, None), Vec::<String>::new());
    }

    #[test]
    fn already_wildcarded_ingress_domain_is_not_double_wildcarded() {
        let mut s = spec();
        s.control_plane_config.serving_certificates = None;
        s.ingress = vec![IngressConfig {
            name: "default".to_string(),
            domain: "*.apps.example.com".to_string(),
            serving_certificate: "testbundle".to_string(),
        }];
        let cluster = cd(s);
        assert_eq!(
            domains_for_bundle(&cluster, &testbundle(), None),
            vec!["*.apps.example.com".to_string()]
        );
    }
}
