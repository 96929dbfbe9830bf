use crate::acme::RealAcmeClientFactory;
use crate::config::Config;
use crate::controllers::{certificaterequest, clusterdeployment};
use crate::dns::KubeDnsProviderFactory;
use crate::error::{AcmeError, Result};
use crate::metrics::MetricsRegistry;
use crate::secret::KubeSecretStore;
use crate::server::{self, HealthCheck};
use std::sync::Arc;

const SERVICEACCOUNT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// The namespace this operator's own Pod runs in, used to locate the shared
/// fallback ACME account secret. Read via the usual in-cluster downward-API
/// convention, falling back to `POD_NAMESPACE` and finally `default` so the
/// binary still starts outside a cluster (e.g. against a kubeconfig).
fn pod_namespace() -> String {
    if let Ok(ns) = std::env::var("POD_NAMESPACE") {
        return ns;
    }
    if let Ok(ns) = std::fs::read_to_string(SERVICEACCOUNT_NAMESPACE_FILE) {
        return ns.trim().to_string();
    }
    "default".to_string()
}

/// Loads config, wires both reconcile loops and the metrics server, and
/// blocks forever.
pub async fn handle_run(config_path: String) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;
    config.apply_env_overrides()?;
    config.validate()?;

    let client = kube::Client::try_default()
        .await
        .map_err(AcmeError::Kube)?;

    let metrics = Arc::new(MetricsRegistry::new());
    let health = Arc::new(HealthCheck::new());

    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|e| AcmeError::transport(format!("failed to build HTTP client: {e}")))?;

    let acme_factory = Arc::new(RealAcmeClientFactory::new(
        config.acme.directory.clone(),
        http_client.clone(),
    ));
    let dns_factory = Arc::new(KubeDnsProviderFactory::new(
        client.clone(),
        config.operator.hosted_zone_id.clone(),
    ));
    let secrets = Arc::new(KubeSecretStore::new(client.clone()));

    let cr_ctx = Arc::new(certificaterequest::CertificateRequestContext {
        client: client.clone(),
        issuance: certificaterequest::IssuanceContext {
            acme_factory,
            dns_factory,
            secrets,
            http_client,
            dns_propagation: config.dns_propagation.clone(),
            metrics: metrics.clone(),
            tos_agreed: config.acme.tos_agreed,
            operator_namespace: pod_namespace(),
        },
    });

    let cd_ctx = Arc::new(clusterdeployment::ClusterDeploymentContext {
        client: client.clone(),
        settings: clusterdeployment::ReconcileSettings {
            default_email: config.operator.default_notification_email_address.clone(),
            reissue_before_days: config.operator.reissue_before_days,
            extra_record: config.operator.extra_record.clone(),
        },
    });

    let metrics_addr = config
        .metrics
        .listen_addr
        .parse()
        .map_err(|e| AcmeError::configuration(format!("invalid metrics.listen_addr: {e}")))?;

    tokio::select! {
        _ = certificaterequest::run(cr_ctx) => {}
        _ = clusterdeployment::run(cd_ctx) => {}
        result = server::start_server(metrics_addr, metrics, health) => {
            result?;
        }
    }

    Ok(())
}
