/// Canned ACME adapter for reconciler tests: no network, deterministic
/// responses, and a `set_maintenance` switch to simulate the CA's
/// well-known "service in maintenance" error (scenario S5).
use super::{AcmeClientAdapter, AcmeClientFactory};
use crate::account::KeyPair;
use crate::crypto::Sha256Hash;
use crate::error::{AcmeError, Result};
use crate::order::{Authorization, Challenge, Order};
use crate::types::{Identifier, RevocationReason};
use async_trait::async_trait;
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A real, parseable self-signed certificate covering `domains` — finalized
/// orders need to survive `parse_certificate_chain`/`verify_certificate_domains`
/// the same as a real CA's response would.
fn self_signed_certificate_pem(domains: &[String]) -> Result<String> {
    let mut params = CertificateParams::new(domains.to_vec());
    let mut dn = DistinguishedName::new();
    if let Some(first) = domains.first() {
        dn.push(DnType::CommonName, first.clone());
    }
    params.distinguished_name = dn;

    let cert = Certificate::from_params(params)
        .map_err(|e| AcmeError::crypto(format!("failed to generate mock certificate: {e}")))?;
    cert.serialize_pem()
        .map_err(|e| AcmeError::crypto(format!("failed to serialize mock certificate: {e}")))
}

const MAINTENANCE_BODY: &str =
    "The service is currently unavailable for maintenance, please try again later";

/// Stand-in for a real JWK thumbprint; the mock has no account key to
/// derive one from.
const FAKE_THUMBPRINT: &str = "mock-account-thumbprint";

struct OrderRecord {
    order: Order,
    authz_urls: Vec<String>,
    finalized: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, String>,
    orders: HashMap<String, OrderRecord>,
    authorizations: HashMap<String, Authorization>,
    certificates: HashMap<String, String>,
    revoked: Vec<Vec<u8>>,
}

pub struct MockAcmeClient {
    maintenance: AtomicBool,
    counter: AtomicU64,
    state: Mutex<State>,
}

impl Default for MockAcmeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAcmeClient {
    pub fn new() -> Self {
        Self {
            maintenance: AtomicBool::new(false),
            counter: AtomicU64::new(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Flip the CA into (or out of) maintenance mode: every subsequent call
    /// fails with `AcmeError::AcmeMaintenance` until cleared.
    pub fn set_maintenance(&self, in_maintenance: bool) {
        self.maintenance.store(in_maintenance, Ordering::SeqCst);
    }

    pub async fn revoked_certificates(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.revoked.clone()
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    fn maintenance_check(&self) -> Result<()> {
        if self.maintenance.load(Ordering::SeqCst) {
            Err(AcmeError::AcmeMaintenance(MAINTENANCE_BODY.to_string()))
        } else {
            Ok(())
        }
    }

    fn recompute_order_status(record: &mut OrderRecord, authorizations: &HashMap<String, Authorization>) {
        if record.order.status == "valid" || record.order.status == "invalid" {
            return;
        }

        let mut all_valid = true;
        for url in &record.authz_urls {
            match authorizations.get(url).map(|a| a.status.as_str()) {
                Some("valid") => {}
                Some("invalid") => {
                    record.order.status = "invalid".to_string();
                    return;
                }
                _ => all_valid = false,
            }
        }

        if all_valid {
            record.order.status = if record.finalized { "valid" } else { "ready" }.to_string();
        }
    }
}

#[async_trait]
impl AcmeClientAdapter for MockAcmeClient {
    async fn update_account(&self, email: &str, _tos_agreed: bool) -> Result<String> {
        self.maintenance_check()?;
        let mut state = self.state.lock().await;
        if let Some(id) = state.accounts.get(email) {
            return Ok(id.clone());
        }
        let id = format!("https://mock.acme.test/account/{}", self.next_id());
        state.accounts.insert(email.to_string(), id.clone());
        Ok(id)
    }

    async fn new_order(&self, _account_id: &str, domains: &[String]) -> Result<(String, Order)> {
        self.maintenance_check()?;
        let mut state = self.state.lock().await;

        let order_id = self.next_id();
        let order_url = format!("https://mock.acme.test/order/{order_id}");
        let finalize_url = format!("https://mock.acme.test/order/{order_id}/finalize");

        let mut authz_urls = Vec::with_capacity(domains.len());
        for domain in domains {
            let authz_id = self.next_id();
            let authz_url = format!("https://mock.acme.test/authz/{authz_id}");
            let challenge = Challenge {
                challenge_type: "dns-01".to_string(),
                url: format!("https://mock.acme.test/challenge/{authz_id}"),
                status: "pending".to_string(),
                token: format!("token-{authz_id}"),
                key_authorization: None,
                validation: None,
                updated: None,
                error: None,
            };
            let authorization = Authorization {
                identifier: Identifier::dns(domain.clone()),
                status: "pending".to_string(),
                expires: "2030-01-01T00:00:00Z".to_string(),
                challenges: vec![challenge],
                wildcard: Some(domain.starts_with("*.")),
                combined_challenges: None,
            };
            state.authorizations.insert(authz_url.clone(), authorization);
            authz_urls.push(authz_url);
        }

        let order = Order {
            status: "pending".to_string(),
            expires: "2030-01-01T00:00:00Z".to_string(),
            identifiers: domains.iter().map(|d| Identifier::dns(d.clone())).collect(),
            authorizations: authz_urls.clone(),
            finalize: finalize_url,
            certificate: None,
            combined_authorizations: None,
        };

        state.orders.insert(
            order_url.clone(),
            OrderRecord {
                order: order.clone(),
                authz_urls,
                finalized: false,
            },
        );

        Ok((order_url, order))
    }

    async fn fetch_authorization(&self, _account_id: &str, url: &str) -> Result<Authorization> {
        self.maintenance_check()?;
        let state = self.state.lock().await;
        state
            .authorizations
            .get(url)
            .cloned()
            .ok_or_else(|| AcmeError::not_found(format!("no authorization at {url}")))
    }

    async fn update_challenge(&self, _account_id: &str, challenge_url: &str) -> Result<Challenge> {
        self.maintenance_check()?;
        let mut state = self.state.lock().await;

        let (authz_url, challenge) = state
            .authorizations
            .iter_mut()
            .find_map(|(authz_url, authz)| {
                authz
                    .challenges
                    .iter_mut()
                    .find(|c| c.url == challenge_url)
                    .map(|c| (authz_url.clone(), c))
            })
            .ok_or_else(|| AcmeError::not_found(format!("no challenge at {challenge_url}")))?;

        challenge.status = "valid".to_string();
        let result = challenge.clone();

        if let Some(authz) = state.authorizations.get_mut(&authz_url) {
            authz.status = "valid".to_string();
        }

        let authorizations = state.authorizations.clone();
        for record in state.orders.values_mut() {
            if record.authz_urls.contains(&authz_url) {
                Self::recompute_order_status(record, &authorizations);
            }
        }

        Ok(result)
    }

    async fn finalize_order(
        &self,
        _account_id: &str,
        finalize_url: &str,
        _csr_der: &[u8],
    ) -> Result<Order> {
        self.maintenance_check()?;
        let mut state = self.state.lock().await;

        let (order_url, _) = state
            .orders
            .iter()
            .find(|(_, r)| r.order.finalize == finalize_url)
            .map(|(k, _)| (k.clone(), ()))
            .ok_or_else(|| AcmeError::not_found(format!("no order with finalize URL {finalize_url}")))?;

        let certificate_url = format!("https://mock.acme.test/certificate/{}", self.next_id());
        let domains: Vec<String> = state.orders[&order_url].order.identifiers.iter().map(|id| id.value.clone()).collect();
        state.certificates.insert(certificate_url.clone(), self_signed_certificate_pem(&domains)?);

        let authorizations = state.authorizations.clone();
        let record = state.orders.get_mut(&order_url).expect("just located");
        record.finalized = true;
        record.order.certificate = Some(certificate_url);
        Self::recompute_order_status(record, &authorizations);

        if record.order.status != "ready" && record.order.status != "valid" {
            return Err(AcmeError::order(
                "order not ready for finalization".to_string(),
                record.order.status.clone(),
            ));
        }
        record.order.status = "valid".to_string();

        Ok(record.order.clone())
    }

    async fn poll_order(
        &self,
        account_id: &str,
        order_url: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<Order> {
        for attempt in 0..max_attempts.max(1) {
            self.maintenance_check()?;
            let order = {
                let state = self.state.lock().await;
                state
                    .orders
                    .get(order_url)
                    .map(|r| r.order.clone())
                    .ok_or_else(|| AcmeError::not_found(format!("no order at {order_url}")))?
            };

            match order.status.as_str() {
                "ready" | "valid" | "invalid" => return Ok(order),
                _ if attempt + 1 == max_attempts => {
                    return Err(AcmeError::timeout(format!(
                        "order {order_url} still {} after {max_attempts} attempts",
                        order.status
                    )));
                }
                _ => tokio::time::sleep(interval).await,
            }
        }

        let _ = account_id;
        unreachable!("loop always returns or errors")
    }

    async fn fetch_certificates(&self, _account_id: &str, certificate_url: &str) -> Result<String> {
        self.maintenance_check()?;
        let state = self.state.lock().await;
        state
            .certificates
            .get(certificate_url)
            .cloned()
            .ok_or_else(|| AcmeError::not_found(format!("no certificate at {certificate_url}")))
    }

    async fn revoke_certificate(
        &self,
        _account_id: &str,
        certificate_der: Vec<u8>,
        _reason: Option<RevocationReason>,
    ) -> Result<()> {
        self.maintenance_check()?;
        let mut state = self.state.lock().await;
        state.revoked.push(certificate_der);
        Ok(())
    }

    fn key_authorization_digest(&self, token: &str) -> Result<String> {
        Sha256Hash::hash_base64(format!("{token}.{FAKE_THUMBPRINT}").as_bytes())
    }
}

/// Hands out the same shared [`MockAcmeClient`] regardless of account key,
/// since the mock keeps its issuance state keyed by email/domain, not key.
#[derive(Clone)]
pub struct MockAcmeClientFactory(Arc<MockAcmeClient>);

impl MockAcmeClientFactory {
    pub fn new(inner: Arc<MockAcmeClient>) -> Self {
        Self(inner)
    }
}

impl AcmeClientFactory for MockAcmeClientFactory {
    fn build(&self, _key_pair: KeyPair) -> Arc<dyn AcmeClientAdapter> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_issuance_flow_reaches_valid() {
        let client = MockAcmeClient::new();
        let account_id = client.update_account("ops@example.com", true).await.unwrap();

        let (order_url, order) = client
            .new_order(&account_id, &["api.example.com".to_string()])
            .await
            .unwrap();
        assert_eq!(order.status, "pending");

        let authz = client
            .fetch_authorization(&account_id, &order.authorizations[0])
            .await
            .unwrap();
        let challenge = &authz.challenges[0];

        client
            .update_challenge(&account_id, &challenge.url)
            .await
            .unwrap();

        let ready = client
            .poll_order(&account_id, &order_url, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(ready.status, "ready");

        let finalized = client
            .finalize_order(&account_id, &ready.finalize, b"csr-der")
            .await
            .unwrap();
        assert_eq!(finalized.status, "valid");

        let pem = client
            .fetch_certificates(&account_id, finalized.certificate.as_ref().unwrap())
            .await
            .unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
    }

    #[tokio::test]
    async fn maintenance_mode_fails_every_call() {
        let client = MockAcmeClient::new();
        client.set_maintenance(true);

        let err = client.update_account("ops@example.com", true).await.unwrap_err();
        assert_eq!(err.classify(), crate::error::Disposition::Maintenance);
    }
}
