/// Custom resource types reconciled by this operator.
pub mod certificate_request;
pub mod cluster_deployment;

pub use certificate_request::{CertificateRequest, CertificateRequestSpec, CertificateRequestStatus};
pub use cluster_deployment::{
    domains_for_bundle, CertificateBundle, ClusterDeployment, ClusterDeploymentSpec, CredentialsRef, Platform,
};

/// Condition shared by both CRDs' status, mirroring the
/// `metav1.Condition` shape Kubernetes API conventions expect.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "lastTransitionTime")]
    pub last_transition_time: Option<String>,
}
