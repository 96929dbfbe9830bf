//! Reconciles `CertificateRequest`: drives the ACME DNS-01 issuance pipeline
//! (spec §4.3) from a bare spec to a populated TLS secret, reissues before
//! expiry, and revokes on deletion.
use super::{requeue_after, retry_delay, ObjectKey};
use crate::account::KeyPair;
use crate::acme::AcmeClientFactory;
use crate::config::DnsPropagationSettings;
use crate::dns::DnsProviderFactory;
use crate::doh;
use crate::error::{AcmeError, Disposition, Result};
use crate::metrics::SharedMetrics;
use crate::model::{CertificateRequest, Condition};
use crate::order::csr::{parse_certificate_chain, CsrGenerator};
use crate::order::Order;
use crate::queue::{run_workers, ReconcileQueue};
use crate::secret::{CertificateSecret, SecretStore};
use crate::types::RevocationReason;
use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;

const FIELD_MANAGER: &str = "certman-operator";
const WORKER_COUNT: usize = 4;
const ACME_API_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_MAX_ATTEMPTS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Where the shared fallback ACME account lives when a request's own secret
/// doesn't yet carry one.
const FALLBACK_ACCOUNT_SECRET: &str = "lets-encrypt-account";

/// Everything `apply()`/`issue()`/`cleanup()` need, with no dependency on a
/// live `kube::Client` — the business logic those functions run is testable
/// on its own, the same way `SecretStore`/`AcmeClientFactory` already are.
pub struct IssuanceContext {
    pub acme_factory: Arc<dyn AcmeClientFactory>,
    pub dns_factory: Arc<dyn DnsProviderFactory>,
    pub secrets: Arc<dyn SecretStore>,
    pub http_client: reqwest::Client,
    pub dns_propagation: DnsPropagationSettings,
    pub metrics: SharedMetrics,
    pub tos_agreed: bool,
    pub operator_namespace: String,
}

pub struct CertificateRequestContext {
    pub client: Client,
    pub issuance: IssuanceContext,
}

/// Writes a CertificateRequest's `.status`, the one piece of Kubernetes I/O
/// `apply()`/`issue()` need directly — everything else goes through
/// `acme_factory`/`dns_factory`/`secrets`. Split out the same way those are,
/// so reconcile-level tests can drive the real business logic without a
/// cluster.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn patch_status(
        &self,
        cr: &CertificateRequest,
        status: &crate::model::certificate_request::CertificateRequestStatus,
    ) -> Result<()>;
}

pub struct KubeStatusWriter {
    api: Api<CertificateRequest>,
}

impl KubeStatusWriter {
    pub fn new(api: Api<CertificateRequest>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_status(
        &self,
        cr: &CertificateRequest,
        status: &crate::model::certificate_request::CertificateRequestStatus,
    ) -> Result<()> {
        let patch = serde_json::json!({
            "apiVersion": "certman.managed.openshift.io/v1alpha1",
            "kind": "CertificateRequest",
            "status": status,
        });

        self.api
            .patch_status(&cr.name_any(), &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(patch))
            .await
            .map_err(AcmeError::Kube)?;

        Ok(())
    }
}

/// Starts the watch → queue → worker-pool pipeline and blocks forever.
pub async fn run(ctx: Arc<CertificateRequestContext>) {
    let api: Api<CertificateRequest> = Api::all(ctx.client.clone());
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

async fn watch_loop(api: Api<CertificateRequest>, queue: ReconcileQueue<ObjectKey>) {
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
            Err(e) => tracing::warn!(error = %e, "CertificateRequest watch stream error"),
        }
    }
}

async fn reconcile(ctx: Arc<CertificateRequestContext>, queue: ReconcileQueue<ObjectKey>, key: ObjectKey) {
    use kube::runtime::controller::Action;
    use std::sync::Mutex;

    let api: Api<CertificateRequest> = Api::namespaced(ctx.client.clone(), &key.namespace);

    let obj = match api.get(&key.name).await {
        Ok(obj) => Arc::new(obj),
        Err(kube::Error::Api(e)) if e.code == 404 => return,
        Err(e) => {
            tracing::warn!(%key, error = %e, "failed to fetch CertificateRequest");
            requeue_after(queue, key, Duration::from_secs(30));
            return;
        }
    };

    // `finalizer()` requires its closure to return a `kube::runtime::controller::Action`,
    // a type meant for `Controller`'s own scheduler, which we don't run. We
    // always hand back `Action::await_change()` and thread the real
    // requeue delay out through this side channel instead.
    let next_requeue: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
    let status_writer = KubeStatusWriter::new(api.clone());

    let result = finalizer(&api, crate::model::certificate_request::FINALIZER, obj, |event| {
        let issuance = &ctx.issuance;
        let status_writer = &status_writer;
        let next_requeue = next_requeue.clone();
        async move {
            let delay = match event {
                FinalizerEvent::Apply(cr) => apply(issuance, status_writer, &cr).await?,
                FinalizerEvent::Cleanup(cr) => cleanup(issuance, &cr).await?,
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
            tracing::warn!(%key, error = %e, ?disposition, "CertificateRequest reconcile failed");
            if let Some(delay) = retry_delay(disposition) {
                requeue_after(queue, key, delay);
            }
        }
    }
}

/// A `kube::runtime::finalizer::Error` wraps either our own reconcile error
/// (apply/cleanup) or a framework-level finalizer patch failure.
fn classify_finalizer_error(e: &kube::runtime::finalizer::Error<AcmeError>) -> Disposition {
    match e {
        kube::runtime::finalizer::Error::ApplyFailed(inner) | kube::runtime::finalizer::Error::CleanupFailed(inner) => {
            inner.classify()
        }
        _ => Disposition::Swallowed,
    }
}

/// Non-finalizer reconcile action: issue, reissue, or leave alone.
enum Decision {
    NeedsIssue,
    Valid(Duration),
}

fn validate_spec(cr: &CertificateRequest) -> Result<()> {
    if cr.spec.dns_names.is_empty() {
        return Err(AcmeError::invalid_spec("dnsNames must not be empty"));
    }
    let zone_suffix = format!(".{}", cr.spec.acme_dns_domain.trim_start_matches('.'));
    let zone_matches = |name: &str| name == cr.spec.acme_dns_domain || name.ends_with(&zone_suffix);
    if !cr.spec.dns_names.iter().all(|n| zone_matches(n)) {
        return Err(AcmeError::invalid_spec(format!(
            "acmeDnsDomain {} is not a suffix of every entry in dnsNames",
            cr.spec.acme_dns_domain
        )));
    }
    Ok(())
}

struct LeafInfo {
    issuer_cn: String,
    not_before: String,
    not_after: String,
    serial_number: String,
    expires_in: Duration,
}

fn parse_leaf(leaf_der: &[u8]) -> Result<LeafInfo> {
    let (_, cert) = x509_parser::parse_x509_certificate(leaf_der)
        .map_err(|e| AcmeError::certificate(format!("failed to parse leaf certificate: {e}")))?;

    let issuer_cn = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let not_after_ts = cert.validity().not_after.timestamp();
    let not_before_ts = cert.validity().not_before.timestamp();
    let now = jiff::Timestamp::now().as_second();
    let expires_in = Duration::from_secs((not_after_ts - now).max(0) as u64);

    Ok(LeafInfo {
        issuer_cn,
        not_before: jiff::Timestamp::from_second(not_before_ts)
            .map(|t| t.to_string())
            .unwrap_or_default(),
        not_after: jiff::Timestamp::from_second(not_after_ts)
            .map(|t| t.to_string())
            .unwrap_or_default(),
        serial_number: cert.raw_serial_as_string(),
        expires_in,
    })
}

fn reissue_before_days(cr: &CertificateRequest) -> u32 {
    let days = cr.reissue_before_days();
    if days == 0 {
        crate::model::certificate_request::DEFAULT_REISSUE_BEFORE_DAYS
    } else {
        days
    }
}

/// `CertificateRequest.Status, secret` → (NeedsIssue | Valid(requeue-after)).
async fn evaluate(ctx: &IssuanceContext, cr: &CertificateRequest, secret: &Option<CertificateSecret>) -> Result<Decision> {
    let Some(secret) = secret else {
        return Ok(Decision::NeedsIssue);
    };
    if !secret.has_certificate() {
        return Ok(Decision::NeedsIssue);
    }

    let chain = parse_certificate_chain(secret.tls_crt.as_ref().unwrap())?;
    let leaf = parse_leaf(&chain[0])?;
    let _ = ctx;

    let reissue_before = Duration::from_secs(u64::from(reissue_before_days(cr)) * 24 * 3600);
    let san_covers = crate::order::csr::verify_certificate_domains(&chain[0], &cr.spec.dns_names)?;

    if !san_covers || leaf.expires_in <= reissue_before {
        return Ok(Decision::NeedsIssue);
    }

    Ok(Decision::Valid(leaf.expires_in - reissue_before))
}

/// Runs one non-finalizer reconcile pass. Returns the delay after which this
/// key should requeue itself, or `None` to wait for the next watch event.
async fn apply(
    ctx: &IssuanceContext,
    status_writer: &dyn StatusWriter,
    cr: &Arc<CertificateRequest>,
) -> Result<Option<Duration>> {
    if let Err(e) = validate_spec(cr) {
        handle_failure(ctx, status_writer, cr, &e).await;
        return Ok(None);
    }

    let namespace = cr.namespace().unwrap_or_default();
    let secret_name = cr.spec.certificate_secret.name.clone();

    let secret = match ctx.secrets.get(&namespace, &secret_name).await {
        Ok(s) => s,
        Err(e) => {
            handle_failure(ctx, status_writer, cr, &e).await;
            return Ok(retry_delay(Disposition::Transient));
        }
    };

    let decision = match evaluate(ctx, cr, &secret).await {
        Ok(d) => d,
        Err(e) => {
            handle_failure(ctx, status_writer, cr, &e).await;
            return Ok(Some(retry_delay(e.classify()).unwrap_or(Duration::from_secs(120))));
        }
    };

    match decision {
        Decision::Valid(requeue_in) => Ok(Some(requeue_in)),
        Decision::NeedsIssue => match issue(ctx, status_writer, cr, &namespace, &secret_name, secret).await {
            Ok(()) => Ok(None),
            Err(e) => {
                handle_failure(ctx, status_writer, cr, &e).await;
                Ok(Some(retry_delay(e.classify()).unwrap_or(Duration::from_secs(120))))
            }
        },
    }
}

async fn load_or_create_account(
    ctx: &IssuanceContext,
    cr: &CertificateRequest,
    existing: &Option<CertificateSecret>,
) -> Result<(KeyPair, String)> {
    if let Some(secret) = existing {
        if secret.has_account() {
            let key_pair = KeyPair::from_pem(secret.letsencrypt_account_private_key.as_ref().unwrap())?;
            return Ok((key_pair, secret.letsencrypt_account_url.clone().unwrap()));
        }
    }

    let fallback = ctx
        .secrets
        .get(&ctx.operator_namespace, FALLBACK_ACCOUNT_SECRET)
        .await?;

    let key_pair = match fallback.as_ref().and_then(|s| s.letsencrypt_account_private_key.as_deref()) {
        Some(pem) => KeyPair::from_pem(pem)?,
        None => KeyPair::generate()?,
    };

    let pem = key_pair.serialize_pem();
    let adapter = ctx.acme_factory.build(key_pair);
    let account_url = tokio::time::timeout(
        ACME_API_TIMEOUT,
        adapter.update_account(&cr.spec.email, ctx.tos_agreed),
    )
    .await
    .map_err(|_| AcmeError::timeout("update_account timed out"))??;

    Ok((KeyPair::from_pem(&pem)?, account_url))
}

async fn issue(
    ctx: &IssuanceContext,
    status_writer: &dyn StatusWriter,
    cr: &CertificateRequest,
    namespace: &str,
    secret_name: &str,
    existing_secret: Option<CertificateSecret>,
) -> Result<()> {
    let issuance_start = std::time::Instant::now();

    let dns = ctx.dns_factory.provider_for(namespace, &cr.spec.platform).await?;
    dns.validate_dns_write_access(&cr.spec.acme_dns_domain).await?;

    let (account_key, account_id) = load_or_create_account(ctx, cr, &existing_secret).await?;
    let account_pem = account_key.serialize_pem();
    let adapter = ctx.acme_factory.build(account_key);

    let (order_url, order) = tokio::time::timeout(
        ACME_API_TIMEOUT,
        adapter.new_order(&account_id, &cr.spec.dns_names),
    )
    .await
    .map_err(|_| AcmeError::timeout("new_order timed out"))??;
    let _ = order_url;

    for authz_url in &order.authorizations {
        let authz = adapter.fetch_authorization(&account_id, authz_url).await?;
        let challenge = authz
            .get_challenge("dns-01")
            .ok_or_else(|| AcmeError::challenge(authz.identifier.value.clone(), "no dns-01 challenge offered".to_string()))?;

        let digest = adapter.key_authorization_digest(&challenge.token)?;
        let domain = authz.identifier.value.trim_start_matches("*.");
        dns.answer_dns_challenge(domain, &digest).await?;
    }

    for authz_url in &order.authorizations {
        let authz = adapter.fetch_authorization(&account_id, authz_url).await?;
        let challenge = authz.get_challenge("dns-01").expect("checked above");
        let digest = adapter.key_authorization_digest(&challenge.token)?;
        let domain = authz.identifier.value.trim_start_matches("*.");
        doh::check_propagation(&ctx.http_client, &ctx.dns_propagation, domain, &digest).await?;
    }

    for authz_url in &order.authorizations {
        let authz = adapter.fetch_authorization(&account_id, authz_url).await?;
        let challenge = authz.get_challenge("dns-01").expect("checked above");
        adapter.update_challenge(&account_id, &challenge.url).await?;
    }

    let order: Order = adapter
        .poll_order(&account_id, &order.finalize, POLL_MAX_ATTEMPTS, POLL_INTERVAL)
        .await?;

    let csr_generator = CsrGenerator::new(cr.spec.dns_names.clone());
    let (csr_der, tls_key_pem) = csr_generator.generate()?;

    let finalized = adapter
        .finalize_order(&account_id, &order.finalize, &csr_der)
        .await?;
    let certificate_url = finalized
        .certificate
        .ok_or_else(|| AcmeError::order("valid".to_string(), "order missing certificate URL".to_string()))?;

    let chain_pem = adapter.fetch_certificates(&account_id, &certificate_url).await?;
    let chain = parse_certificate_chain(&chain_pem)?;
    if chain.len() < 2 {
        tracing::warn!(cr = cr.name_any(), "certificate chain shorter than expected (leaf + issuer)");
    }
    if !crate::order::csr::verify_certificate_domains(&chain[0], &cr.spec.dns_names)? {
        return Err(AcmeError::certificate("issued certificate SAN does not cover requested dnsNames"));
    }

    let secret = CertificateSecret {
        tls_crt: Some(chain_pem),
        tls_key: Some(tls_key_pem),
        letsencrypt_account_url: Some(account_id.clone()),
        letsencrypt_account_private_key: Some(account_pem),
    };
    ctx.secrets.put(namespace, secret_name, &cr.name_any(), &secret).await?;

    for authz_url in &order.authorizations {
        if let Ok(authz) = adapter.fetch_authorization(&account_id, authz_url).await {
            let domain = authz.identifier.value.trim_start_matches("*.");
            let _ = dns.delete_acme_challenge_resource_records(domain).await;
        }
    }

    let leaf = parse_leaf(&chain[0])?;
    patch_status(status_writer, cr, |status| {
        status.issued = true;
        status.issuer_name = Some(leaf.issuer_cn.clone());
        status.not_before = Some(leaf.not_before.clone());
        status.not_after = Some(leaf.not_after.clone());
        status.serial_number = Some(leaf.serial_number.clone());
        status.status = Some("Success".to_string());
    })
    .await?;

    ctx.metrics.renewals_total.inc();
    ctx.metrics.certs_managed.inc();
    ctx.metrics
        .certs_issued_total
        .with_label_values(&[&cr.name_any(), namespace])
        .inc();
    let cn = cr.spec.dns_names.first().cloned().unwrap_or_default();
    ctx.metrics
        .cert_valid_duration_seconds
        .with_label_values(&[&cn, &cr.name_any(), namespace])
        .set(leaf.expires_in.as_secs() as i64);
    ctx.metrics
        .issuance_duration_seconds
        .observe(issuance_start.elapsed().as_secs_f64());
    tracing::info!(
        cr = cr.name_any(),
        elapsed_ms = issuance_start.elapsed().as_millis() as u64,
        "certificate issued"
    );

    Ok(())
}

/// The well-known ACME "already revoked" response, treated as success.
fn is_already_revoked(err: &AcmeError) -> bool {
    matches!(err, AcmeError::Order { detail, .. } if detail.to_ascii_lowercase().contains("already revoked"))
}

/// Revokes the issued certificate, per the Revoking state in spec §4.3.
/// Always requeues via the watch (finalizer removal is itself a spec
/// change), so this never returns a self-requeue delay.
async fn cleanup(ctx: &IssuanceContext, cr: &CertificateRequest) -> Result<Option<Duration>> {
    let namespace = cr.namespace().unwrap_or_default();
    let secret = ctx.secrets.get(&namespace, &cr.spec.certificate_secret.name).await?;

    let Some(secret) = secret else {
        return Ok(None);
    };
    if !secret.has_certificate() {
        return Ok(None);
    }

    let chain = parse_certificate_chain(secret.tls_crt.as_ref().unwrap())?;

    if let Some(account_pem) = secret.letsencrypt_account_private_key.as_ref() {
        let account_key = KeyPair::from_pem(account_pem)?;
        let account_id = secret.letsencrypt_account_url.clone().unwrap_or_default();
        let adapter = ctx.acme_factory.build(account_key);

        for cert_der in &chain {
            match adapter
                .revoke_certificate(&account_id, cert_der.clone(), Some(RevocationReason::Unspecified))
                .await
            {
                Ok(()) => {}
                Err(e) if is_already_revoked(&e) => {}
                Err(e) => return Err(e),
            }
        }
    }

    // DNS cleanup is best-effort: revocation (I5/P4) must proceed even if
    // the credentials secret can no longer be resolved.
    if let Ok(dns) = ctx.dns_factory.provider_for(&namespace, &cr.spec.platform).await {
        for domain in &cr.spec.dns_names {
            let domain = domain.trim_start_matches("*.");
            let _ = dns.delete_acme_challenge_resource_records(domain).await;
        }
    }

    Ok(None)
}

async fn handle_failure(ctx: &IssuanceContext, status_writer: &dyn StatusWriter, cr: &CertificateRequest, err: &AcmeError) {
    let disposition = err.classify();
    if matches!(disposition, Disposition::Maintenance) {
        ctx.metrics.letsencrypt_maintenance_error_count.inc();
        tracing::warn!(cr = cr.name_any(), "ACME CA reports maintenance");
    }

    let condition = Condition {
        type_: "acme error".to_string(),
        status: "True".to_string(),
        reason: Some(format!("{disposition:?}")),
        message: Some(err.to_string()),
        last_transition_time: None,
    };

    if let Err(e) = patch_status(status_writer, cr, |status| {
        status.status = Some("Error".to_string());
        upsert_condition(&mut status.conditions, condition.clone());
    })
    .await
    {
        tracing::warn!(cr = cr.name_any(), error = %e, "failed to patch failure status");
    }
}

/// Replace a condition of the same `type_` in place, or append if absent —
/// so a repeated failure updates rather than re-appends (scenario S5).
fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

async fn patch_status(
    status_writer: &dyn StatusWriter,
    cr: &CertificateRequest,
    mutate: impl FnOnce(&mut crate::model::certificate_request::CertificateRequestStatus),
) -> Result<()> {
    let mut status = cr.status.clone().unwrap_or_default();
    mutate(&mut status);
    status_writer.patch_status(cr, &status).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::certificate_request::CertificateSecretRef;
    use crate::model::{CertificateRequestSpec, CredentialsRef, Platform};

    fn cr(dns_names: Vec<&str>, acme_dns_domain: &str) -> CertificateRequest {
        CertificateRequest::new(
            "foo-default",
            CertificateRequestSpec {
                dns_names: dns_names.into_iter().map(String::from).collect(),
                acme_dns_domain: acme_dns_domain.to_string(),
                email: "ops@example.com".to_string(),
                certificate_secret: CertificateSecretRef {
                    name: "foo-default-cert".to_string(),
                },
                reissue_before_days: 0,
                platform: Platform::Aws {
                    region: "us-east-1".to_string(),
                    credentials: CredentialsRef {
                        name: "aws-iam-secret".to_string(),
                    },
                },
                api_url: None,
                web_console_url: None,
            },
        )
    }

    #[test]
    fn rejects_empty_dns_names() {
        let cr = cr(vec![], "apps.foo.example.com");
        assert!(validate_spec(&cr).is_err());
    }

    #[test]
    fn rejects_dns_name_outside_acme_dns_domain() {
        let cr = cr(vec!["api.foo.example.com"], "apps.foo.example.com");
        assert!(validate_spec(&cr).is_err());
    }

    #[test]
    fn accepts_dns_names_under_the_acme_dns_domain() {
        let cr = cr(
            vec!["apps.foo.example.com", "console.apps.foo.example.com"],
            "apps.foo.example.com",
        );
        assert!(validate_spec(&cr).is_ok());
    }

    #[test]
    fn reissue_before_days_falls_back_to_default_when_unset() {
        let cr = cr(vec!["apps.foo.example.com"], "apps.foo.example.com");
        assert_eq!(
            reissue_before_days(&cr),
            crate::model::certificate_request::DEFAULT_REISSUE_BEFORE_DAYS
        );
    }

    #[test]
    fn upsert_condition_replaces_same_type_in_place() {
        let mut conditions = vec![Condition {
            type_: "acme error".to_string(),
            status: "True".to_string(),
            reason: Some("Transient".to_string()),
            message: Some("first failure".to_string()),
            last_transition_time: None,
        }];

        upsert_condition(
            &mut conditions,
            Condition {
                type_: "acme error".to_string(),
                status: "True".to_string(),
                reason: Some("Validation".to_string()),
                message: Some("second failure".to_string()),
                last_transition_time: None,
            },
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message.as_deref(), Some("second failure"));
    }

    #[test]
    fn is_already_revoked_matches_the_acme_already_revoked_detail() {
        let err = AcmeError::order("malformed".to_string(), "Certificate already revoked".to_string());
        assert!(is_already_revoked(&err));
        assert!(!is_already_revoked(&AcmeError::order(
            "malformed".to_string(),
            "some other problem".to_string()
        )));
    }

    // Reconcile-level tests below drive `apply()` itself against spec §8's
    // scenarios. `acme_factory`/`dns_factory`/`secrets` are already
    // injectable; `StatusWriter` closes the last gap so these run without a
    // cluster.

    use crate::acme::mock::{MockAcmeClient, MockAcmeClientFactory};
    use crate::acme::AcmeClientAdapter;
    use crate::config::{DnsPropagationSettings, DohAnswerMode};
    use crate::dns::providers::{MockDnsProvider, MockDnsProviderFactory};
    use crate::secret::MemorySecretStore;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct InMemoryStatusWriter {
        statuses: AsyncMutex<StdHashMap<String, crate::model::certificate_request::CertificateRequestStatus>>,
    }

    impl InMemoryStatusWriter {
        async fn get(&self, name: &str) -> Option<crate::model::certificate_request::CertificateRequestStatus> {
            self.statuses.lock().await.get(name).cloned()
        }
    }

    #[async_trait]
    impl StatusWriter for InMemoryStatusWriter {
        async fn patch_status(
            &self,
            cr: &CertificateRequest,
            status: &crate::model::certificate_request::CertificateRequestStatus,
        ) -> Result<()> {
            self.statuses.lock().await.insert(cr.name_any(), status.clone());
            Ok(())
        }
    }

    fn test_context(
        acme: Arc<MockAcmeClient>,
        dns: Arc<MockDnsProvider>,
        http_client: reqwest::Client,
        dns_propagation: DnsPropagationSettings,
    ) -> IssuanceContext {
        IssuanceContext {
            acme_factory: Arc::new(MockAcmeClientFactory::new(acme)),
            dns_factory: Arc::new(MockDnsProviderFactory::new(dns)),
            secrets: Arc::new(MemorySecretStore::new()),
            http_client,
            dns_propagation,
            metrics: Arc::new(crate::metrics::MetricsRegistry::new()),
            tos_agreed: true,
            operator_namespace: "certman-operator".to_string(),
        }
    }

    /// S4: a bare CertificateRequest runs the full DNS-01 pipeline against
    /// the mock ACME/DNS/DoH stack and ends up with `status.issued = true`,
    /// a written secret, and the issuance-duration histogram incremented
    /// once.
    #[tokio::test]
    async fn issuance_reaches_issued_and_records_metrics() {
        let acme = Arc::new(MockAcmeClient::new());
        let dns = Arc::new(MockDnsProvider::new());
        dns.allow_zone("foo.example.com");

        // MockAcmeClient's id counter is deterministic from a fresh
        // instance: 1 is consumed by `update_account`, 2 by the order, 3 by
        // the (single) domain's authorization -> challenge token "token-3".
        let expected_digest = acme.key_authorization_digest("token-3").unwrap();

        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(format!("has {expected_digest} in it"))
            .create_async()
            .await;

        let dns_propagation = DnsPropagationSettings {
            endpoint: server.url(),
            max_attempts: 1,
            retry_delay_secs: 0,
            request_timeout_secs: 5,
            answer_mode: DohAnswerMode::Substring,
        };

        let ctx = test_context(acme.clone(), dns.clone(), reqwest::Client::new(), dns_propagation);
        let status_writer = InMemoryStatusWriter::default();
        let request = Arc::new(cr(vec!["api.foo.example.com"], "foo.example.com"));

        let result = apply(&ctx, &status_writer, &request).await.expect("apply succeeds");
        assert!(result.is_none(), "a freshly-issued cert requeues via the watch, not a timer");

        let status = status_writer.get("foo-default").await.expect("status was patched");
        assert!(status.issued);
        assert_eq!(status.status.as_deref(), Some("Success"));

        let secret = ctx
            .secrets
            .get("", "foo-default-cert")
            .await
            .unwrap()
            .expect("secret was written");
        assert!(secret.has_certificate());
        assert!(secret.has_account());

        assert_eq!(ctx.metrics.issuance_duration_seconds.get_sample_count(), 1);
        assert_eq!(
            ctx.metrics
                .certs_issued_total
                .with_label_values(&["foo-default", ""])
                .get(),
            1
        );
    }

    /// S5: the ACME CA reporting maintenance records the metric and appends
    /// an `acme error` condition; a second consecutive failure against the
    /// same CertificateRequest updates that condition in place rather than
    /// appending a duplicate, and does not double-count the metric beyond
    /// each `apply()` call incrementing it once.
    #[tokio::test]
    async fn maintenance_error_is_recorded_once_and_condition_is_not_duplicated() {
        let acme = Arc::new(MockAcmeClient::new());
        acme.set_maintenance(true);
        let dns = Arc::new(MockDnsProvider::new());

        let ctx = test_context(acme, dns, reqwest::Client::new(), DnsPropagationSettings::default());
        let status_writer = InMemoryStatusWriter::default();
        let request = cr(vec!["api.foo.example.com"], "foo.example.com");

        apply(&ctx, &status_writer, &Arc::new(request.clone()))
            .await
            .expect("apply reports failure via status, not Err");
        assert_eq!(ctx.metrics.letsencrypt_maintenance_error_count.get(), 1);

        let status_after_first = status_writer.get("foo-default").await.expect("status was patched");
        assert_eq!(status_after_first.conditions.len(), 1);
        assert_eq!(status_after_first.conditions[0].type_, "acme error");

        // Simulate the next reconcile observing the patched status, the way
        // a real watch event would hand back the updated object.
        let mut second = request;
        second.status = Some(status_after_first);
        apply(&ctx, &status_writer, &Arc::new(second)).await.unwrap();

        assert_eq!(ctx.metrics.letsencrypt_maintenance_error_count.get(), 2);
        let status_after_second = status_writer.get("foo-default").await.expect("status was patched");
        assert_eq!(
            status_after_second.conditions.len(),
            1,
            "repeated failure updates the existing condition instead of appending"
        );
    }
}
