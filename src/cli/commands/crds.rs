use crate::error::Result;
use crate::model::{CertificateRequest, ClusterDeployment};
use kube::CustomResourceExt;

/// Prints both CustomResourceDefinitions as JSON documents, one per line,
/// suitable for `kubectl apply -f -`.
pub fn handle_crds() -> Result<()> {
    for crd in [ClusterDeployment::crd(), CertificateRequest::crd()] {
        println!("{}", serde_json::to_string_pretty(&crd)?);
    }

    Ok(())
}
