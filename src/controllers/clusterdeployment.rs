//! Reconciles `ClusterDeployment`: computes the set of `CertificateRequest`s
//! a managed, installed cluster should own (spec §4.4) and keeps it in sync,
//! without ever touching certificate material directly.
use super::{requeue_after, retry_delay, ObjectKey};
use crate::error::{AcmeError, Disposition, Result};
use crate::model::certificate_request::CertificateSecretRef;
use crate::model::cluster_deployment::domains_for_bundle;
use crate::model::{CertificateRequest, CertificateRequestSpec, ClusterDeployment};
use crate::queue::{run_workers, ReconcileQueue};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const FIELD_MANAGER: &str = "certman-operator";
const WORKER_COUNT: usize = 2;
/// Periodic resync so drift introduced outside the watch (e.g. a manual
/// edit of an owned CertificateRequest) still self-heals.
const RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Everything `apply()`/`cleanup()` need, with no dependency on a live
/// `kube::Client` — mirrors `certificaterequest::IssuanceContext`.
pub struct ReconcileSettings {
    /// ConfigMap `certman-operator/certman-operator` key
    /// `default_notification_email_address`.
    pub default_email: String,
    /// Days before expiry to reissue, stamped onto every CertificateRequest
    /// this reconciler creates.
    pub reissue_before_days: u32,
    /// `EXTRA_RECORD` env var: when set, `DomainsForBundle` adds a second
    /// API domain to the cluster's default serving certificate.
    pub extra_record: Option<String>,
}

pub struct ClusterDeploymentContext {
    pub client: Client,
    pub settings: ReconcileSettings,
}

/// The CertificateRequest CRUD `apply()`/`cleanup()` need, with no
/// dependency on a live `kube::Client` — mirrors the `StatusWriter` seam in
/// `controllers::certificaterequest`.
#[async_trait]
pub trait CertificateRequestRepo: Send + Sync {
    /// Create or update the named CertificateRequest via server-side apply.
    async fn upsert(
        &self,
        name: &str,
        namespace: &str,
        spec: &CertificateRequestSpec,
        owner_ref: &OwnerReference,
    ) -> Result<()>;

    /// All CertificateRequests in this repo's namespace owned (as controller)
    /// by `cd_uid`.
    async fn list_owned(&self, cd_uid: &str) -> Result<Vec<CertificateRequest>>;

    /// Delete the named CertificateRequest, tolerating not-found.
    async fn delete(&self, name: &str) -> Result<()>;
}

pub struct KubeCertificateRequestRepo {
    api: Api<CertificateRequest>,
}

impl KubeCertificateRequestRepo {
    pub fn new(api: Api<CertificateRequest>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CertificateRequestRepo for KubeCertificateRequestRepo {
    async fn upsert(
        &self,
        name: &str,
        namespace: &str,
        spec: &CertificateRequestSpec,
        owner_ref: &OwnerReference,
    ) -> Result<()> {
        upsert_certificate_request(&self.api, name, namespace, spec, owner_ref).await
    }

    async fn list_owned(&self, cd_uid: &str) -> Result<Vec<CertificateRequest>> {
        let existing = self.api.list(&ListParams::default()).await.map_err(AcmeError::Kube)?;
        Ok(existing.items.into_iter().filter(|cr| owned_by(cr, cd_uid)).collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(AcmeError::Kube(e)),
        }
    }
}

/// Starts the watch → queue → worker-pool pipeline and blocks forever.
pub async fn run(ctx: Arc<ClusterDeploymentContext>) {
    let api: Api<ClusterDeployment> = Api::all(ctx.client.clone());
    let queue: ReconcileQueue<ObjectKey> = ReconcileQueue::new();

    let watch_queue = queue.clone();
    tokio::spawn(watch_loop(api, watch_queue));

    run_workers(queue.clone(), WORKER_COUNT, move |key| {
        let ctx = ctx.clone();
        let queue = queue.clone();
        async move { reconcile(ctx, queue, key).await }
    })
    .await;
}

async fn watch_loop(api: Api<ClusterDeployment>, queue: ReconcileQueue<ObjectKey>) {
    let mut stream = watcher(api, WatcherConfig::default())
        .default_backoff()
        .applied_objects()
        .boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(obj) => {
                let key = ObjectKey {
                    namespace: obj.namespace().unwrap_or_default(),
                    name: obj.name_any(),
                };
                queue.enqueue(key).await;
            }
            Err(e) => tracing::warn!(error = %e, "ClusterDeployment watch stream error"),
        }
    }
}

async fn reconcile(ctx: Arc<ClusterDeploymentContext>, queue: ReconcileQueue<ObjectKey>, key: ObjectKey) {
    use kube::runtime::controller::Action;
    use std::sync::Mutex;

    let cd_api: Api<ClusterDeployment> = Api::namespaced(ctx.client.clone(), &key.namespace);
    let cr_api: Api<CertificateRequest> = Api::namespaced(ctx.client.clone(), &key.namespace);
    let repo = KubeCertificateRequestRepo::new(cr_api);

    let cd = match cd_api.get(&key.name).await {
        Ok(cd) => cd,
        Err(kube::Error::Api(e)) if e.code == 404 => return,
        Err(e) => {
            tracing::warn!(%key, error = %e, "failed to fetch ClusterDeployment");
            requeue_after(queue, key, Duration::from_secs(30));
            return;
        }
    };

    // Admission filter: non-managed clusters only ever have their finalizer
    // stripped, never get an active reconcile.
    if !cd.is_admitted() {
        if let Err(e) = ensure_finalizer_removed(&cd_api, &cd).await {
            tracing::warn!(%key, error = %e, "failed to strip finalizer from non-managed ClusterDeployment");
            requeue_after(queue, key, Duration::from_secs(30));
        }
        return;
    }

    // Active reconciliation step 1: an uninstalled cluster is a no-op,
    // including skipping the delete path below even if deletion is pending.
    if !cd.spec.installed {
        return;
    }

    let cd = Arc::new(cd);
    let next_requeue: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));

    // Same side-channel as the CertificateRequest reconciler: `finalizer()`
    // requires an `Action` it never schedules (we don't run
    // `kube::runtime::Controller`), so we thread the real requeue delay out
    // through `next_requeue` instead.
    let result = finalizer(&cd_api, crate::model::cluster_deployment::FINALIZER, cd, |event| {
        let settings = &ctx.settings;
        let repo = &repo;
        let next_requeue = next_requeue.clone();
        async move {
            let delay = match event {
                FinalizerEvent::Apply(cd) => apply(settings, repo, &cd).await?,
                FinalizerEvent::Cleanup(cd) => cleanup(repo, &cd).await?,
            };
            *next_requeue.lock().unwrap() = delay;
            Ok::<Action, AcmeError>(Action::await_change())
        }
    })
    .await;

    match result {
        Ok(_) => {
            if let Some(delay) = *next_requeue.lock().unwrap() {
                requeue_after(queue, key, delay);
            }
        }
        Err(e) => {
            let disposition = classify_finalizer_error(&e);
            tracing::warn!(%key, error = %e, ?disposition, "ClusterDeployment reconcile failed");
            if let Some(delay) = retry_delay(disposition) {
                requeue_after(queue, key, delay);
            }
        }
    }
}

fn classify_finalizer_error(e: &kube::runtime::finalizer::Error<AcmeError>) -> Disposition {
    match e {
        kube::runtime::finalizer::Error::ApplyFailed(inner) | kube::runtime::finalizer::Error::CleanupFailed(inner) => {
            inner.classify()
        }
        _ => Disposition::Swallowed,
    }
}

/// Strip our finalizer from a non-managed ClusterDeployment, if present.
/// A plain merge patch: there's no reconcile state to coordinate here.
async fn ensure_finalizer_removed(api: &Api<ClusterDeployment>, cd: &ClusterDeployment) -> Result<()> {
    let finalizers = cd.metadata.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == crate::model::cluster_deployment::FINALIZER) {
        return Ok(());
    }
    let remaining: Vec<String> = finalizers
        .into_iter()
        .filter(|f| f != crate::model::cluster_deployment::FINALIZER)
        .collect();

    let patch = serde_json::json!({ "metadata": { "finalizers": remaining } });
    api.patch(&cd.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await
        .map_err(AcmeError::Kube)?;
    Ok(())
}

/// Step 4: the desired `{name -> spec}` map for a managed, installed
/// cluster. Bundles whose domain set is empty are skipped entirely.
fn compute_desired(
    cd: &ClusterDeployment,
    default_email: &str,
    reissue_before_days: u32,
    extra_record: Option<&str>,
) -> HashMap<String, CertificateRequestSpec> {
    let mut desired = HashMap::new();

    for bundle in cd.spec.certificate_bundles.iter().filter(|b| b.generate) {
        let domains = domains_for_bundle(cd, bundle, extra_record);
        if domains.is_empty() {
            continue;
        }

        let name = format!("{}-{}", cd.name_any(), bundle.name);
        let spec = CertificateRequestSpec {
            dns_names: domains,
            acme_dns_domain: cd.spec.base_domain.clone(),
            email: default_email.to_string(),
            certificate_secret: CertificateSecretRef {
                name: bundle.certificate_secret_ref.clone(),
            },
            reissue_before_days,
            platform: cd.spec.platform.clone(),
            api_url: None,
            web_console_url: None,
        };
        desired.insert(name, spec);
    }

    desired
}

fn owned_by(cr: &CertificateRequest, cd_uid: &str) -> bool {
    cr.metadata
        .owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.controller == Some(true) && r.uid == cd_uid))
        .unwrap_or(false)
}

/// Steps 3-6: ensure every desired CertificateRequest exists with the right
/// spec and owner reference (create/update/claim collapse into one
/// server-side-apply per name, idempotent either way), then delete any
/// owned request that's no longer desired.
async fn apply(
    settings: &ReconcileSettings,
    repo: &dyn CertificateRequestRepo,
    cd: &ClusterDeployment,
) -> Result<Option<Duration>> {
    let namespace = cd.namespace().unwrap_or_default();
    let owner_ref = cd
        .controller_owner_ref(&())
        .ok_or_else(|| AcmeError::configuration("ClusterDeployment missing name/uid for owner reference"))?;

    let desired = compute_desired(
        cd,
        &settings.default_email,
        settings.reissue_before_days,
        settings.extra_record.as_deref(),
    );

    for (name, spec) in &desired {
        repo.upsert(name, &namespace, spec, &owner_ref).await?;
    }

    let cd_uid = cd.uid().unwrap_or_default();
    let owned = repo.list_owned(&cd_uid).await?;
    for cr in &owned {
        let name = cr.name_any();
        if !desired.contains_key(&name) {
            repo.delete(&name).await?;
        }
    }

    Ok(Some(RESYNC_INTERVAL))
}

async fn upsert_certificate_request(
    cr_api: &Api<CertificateRequest>,
    name: &str,
    namespace: &str,
    spec: &CertificateRequestSpec,
    owner_ref: &OwnerReference,
) -> Result<()> {
    let patch = serde_json::json!({
        "apiVersion": "certman.managed.openshift.io/v1alpha1",
        "kind": "CertificateRequest",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "ownerReferences": [owner_ref],
        },
        "spec": spec,
    });

    cr_api
        .patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(patch))
        .await
        .map_err(AcmeError::Kube)?;
    Ok(())
}

/// Delete path: remove every CertificateRequest we own. Until the list
/// comes back empty on a later reconcile, the finalizer stays (returning
/// `Err` here keeps `finalizer()` from stripping it), matching scenario
/// S6's two-reconcile pattern.
async fn cleanup(repo: &dyn CertificateRequestRepo, cd: &ClusterDeployment) -> Result<Option<Duration>> {
    let cd_uid = cd.uid().unwrap_or_default();
    let owned = repo.list_owned(&cd_uid).await?;

    if owned.is_empty() {
        return Ok(None);
    }

    for cr in &owned {
        repo.delete(&cr.name_any()).await?;
    }

    Err(AcmeError::pending("owned CertificateRequests still present, awaiting deletion"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cluster_deployment::{
        CertificateBundle, ClusterDeploymentSpec, ControlPlaneConfig, CredentialsRef, IngressConfig, ServingCertificates,
    };
    use crate::model::Platform;
    use tokio::sync::Mutex as AsyncMutex;

    /// In-memory stand-in for [`KubeCertificateRequestRepo`], letting
    /// `apply()`/`cleanup()` run against a fake cluster with no `kube::Client`.
    #[derive(Default)]
    struct InMemoryCertificateRequestRepo {
        store: AsyncMutex<HashMap<String, CertificateRequest>>,
    }

    impl InMemoryCertificateRequestRepo {
        async fn snapshot(&self) -> Vec<CertificateRequest> {
            self.store.lock().await.values().cloned().collect()
        }
    }

    #[async_trait]
    impl CertificateRequestRepo for InMemoryCertificateRequestRepo {
        async fn upsert(
            &self,
            name: &str,
            namespace: &str,
            spec: &CertificateRequestSpec,
            owner_ref: &OwnerReference,
        ) -> Result<()> {
            let mut cr = CertificateRequest::new(name, spec.clone());
            cr.meta_mut().namespace = Some(namespace.to_string());
            cr.meta_mut().owner_references = Some(vec![owner_ref.clone()]);
            self.store.lock().await.insert(name.to_string(), cr);
            Ok(())
        }

        async fn list_owned(&self, cd_uid: &str) -> Result<Vec<CertificateRequest>> {
            Ok(self
                .store
                .lock()
                .await
                .values()
                .filter(|cr| owned_by(cr, cd_uid))
                .cloned()
                .collect())
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.store.lock().await.remove(name);
            Ok(())
        }
    }

    fn test_settings() -> ReconcileSettings {
        ReconcileSettings {
            default_email: "ops@example.com".to_string(),
            reissue_before_days: 45,
            extra_record: None,
        }
    }

    fn cd(bundles: Vec<CertificateBundle>) -> ClusterDeployment {
        let mut cd = ClusterDeployment::new(
            "foo",
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
                        default: Some("default".to_string()),
                        additional: vec![],
                    }),
                },
                ingress: vec![IngressConfig {
                    name: "default".to_string(),
                    domain: "apps.foo.example.com".to_string(),
                    serving_certificate: "default".to_string(),
                }],
                certificate_bundles: bundles,
                installed: true,
            },
        );
        cd.meta_mut().namespace = Some("ns".to_string());
        cd
    }

    #[test]
    fn desired_set_skips_bundles_with_no_domains() {
        let cd = cd(vec![
            CertificateBundle {
                name: "default".to_string(),
                generate: true,
                certificate_secret_ref: "bs".to_string(),
            },
            CertificateBundle {
                name: "empty".to_string(),
                generate: true,
                certificate_secret_ref: "empty-cert".to_string(),
            },
        ]);

        let desired = compute_desired(&cd, "ops@example.com", 45, None);
        assert_eq!(desired.len(), 1);
        assert!(desired.contains_key("foo-default"));
    }

    #[test]
    fn desired_name_matches_cluster_and_bundle() {
        let cd = cd(vec![CertificateBundle {
            name: "default".to_string(),
            generate: true,
            certificate_secret_ref: "primary-cert".to_string(),
        }]);

        let desired = compute_desired(&cd, "ops@example.com", 45, None);
        let spec = desired.get("foo-default").expect("default bundle is desired");
        assert_eq!(spec.acme_dns_domain, "example.com");
        assert_eq!(spec.email, "ops@example.com");
        assert_eq!(spec.certificate_secret.name, "primary-cert");
        assert!(matches!(spec.platform, Platform::Aws { .. }));
    }

    #[test]
    fn non_default_bundle_skipped_when_no_matching_ingress() {
        let cd = cd(vec![CertificateBundle {
            name: "secondary".to_string(),
            generate: true,
            certificate_secret_ref: "secondary-cert".to_string(),
        }]);

        let desired = compute_desired(&cd, "ops@example.com", 45, None);
        assert!(desired.is_empty());
    }

    #[test]
    fn extra_record_is_threaded_into_desired_dns_names() {
        let cd = cd(vec![CertificateBundle {
            name: "default".to_string(),
            generate: true,
            certificate_secret_ref: "primary-cert".to_string(),
        }]);

        let desired = compute_desired(&cd, "ops@example.com", 45, Some("myapi"));
        let spec = desired.get("foo-default").expect("default bundle is desired");
        assert!(spec.dns_names.contains(&"myapi.foo.example.com".to_string()));
    }

    #[tokio::test]
    async fn apply_creates_owned_certificate_request_with_platform_and_finalizer() {
        let mut cd = cd(vec![CertificateBundle {
            name: "default".to_string(),
            generate: true,
            certificate_secret_ref: "primary-cert".to_string(),
        }]);
        cd.meta_mut().uid = Some("cd-uid-1".to_string());
        cd.meta_mut().finalizers = Some(vec![crate::model::cluster_deployment::FINALIZER.to_string()]);

        let repo = InMemoryCertificateRequestRepo::default();
        let settings = test_settings();

        let delay = apply(&settings, &repo, &cd).await.expect("apply succeeds");
        assert!(delay.is_some());

        let created = repo.snapshot().await;
        assert_eq!(created.len(), 1);
        let cr = &created[0];
        assert_eq!(cr.name_any(), "foo-default");
        assert_eq!(cr.namespace().as_deref(), Some("ns"));
        assert_eq!(
            cr.spec.dns_names,
            vec!["*.apps.foo.example.com".to_string(), "api.foo.example.com".to_string()]
        );
        assert!(matches!(cr.spec.platform, Platform::Aws { .. }));

        let owner_refs = cr.metadata.owner_references.as_ref().expect("owner reference set");
        assert_eq!(owner_refs.len(), 1);
        assert_eq!(owner_refs[0].uid, "cd-uid-1");
        assert_eq!(owner_refs[0].controller, Some(true));
    }

    #[tokio::test]
    async fn cleanup_requires_a_second_reconcile_to_drop_the_finalizer() {
        let mut cd = cd(vec![CertificateBundle {
            name: "default".to_string(),
            generate: true,
            certificate_secret_ref: "primary-cert".to_string(),
        }]);
        cd.meta_mut().uid = Some("cd-uid-2".to_string());

        let repo = InMemoryCertificateRequestRepo::default();
        let settings = test_settings();
        apply(&settings, &repo, &cd).await.expect("apply succeeds");
        assert_eq!(repo.snapshot().await.len(), 1);

        // First cleanup: deletes the owned request but keeps the finalizer
        // present by returning Err, matching scenario S6's two-reconcile
        // delete-then-finalizer-removal pattern.
        let first = cleanup(&repo, &cd).await;
        assert!(first.is_err());
        assert!(repo.snapshot().await.is_empty());

        // Second cleanup: nothing left owned, finalizer can now be stripped.
        let second = cleanup(&repo, &cd).await.expect("second cleanup succeeds");
        assert_eq!(second, None);
    }
}
