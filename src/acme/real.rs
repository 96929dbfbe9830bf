/// Production adapter: wraps `protocol`/`account`/`order` behind
/// `AcmeClientAdapter`. Builds a fresh `AccountManager`/`OrderManager` pair
/// per call, since both borrow their directory/nonce managers rather than
/// own them.
use super::{AcmeClientAdapter, AcmeClientFactory};
use crate::account::{AccountManager, KeyPair};
use crate::crypto::Sha256Hash;
use crate::error::Result;
use crate::order::{Authorization, Challenge, CertificateRevocation, NewOrderRequest, Order, OrderManager};
use crate::protocol::{DirectoryManager, Jwk, NonceManager};
use crate::types::{Contact, RevocationReason};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::sync::Arc;
use std::time::Duration;

pub struct RealAcmeClient {
    directory_url: String,
    key_pair: KeyPair,
    http_client: reqwest::Client,
}

impl RealAcmeClient {
    pub fn new(directory_url: impl Into<String>, key_pair: KeyPair, http_client: reqwest::Client) -> Self {
        Self {
            directory_url: directory_url.into(),
            key_pair,
            http_client,
        }
    }

    fn directory_manager(&self) -> DirectoryManager {
        DirectoryManager::new(&self.directory_url, self.http_client.clone())
    }

    async fn nonce_manager(&self, dir_mgr: &DirectoryManager) -> Result<NonceManager> {
        let directory = dir_mgr.get().await?;
        Ok(NonceManager::new(&directory.new_nonce, self.http_client.clone()))
    }
}

#[async_trait]
impl AcmeClientAdapter for RealAcmeClient {
    async fn update_account(&self, email: &str, tos_agreed: bool) -> Result<String> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;

        let account = account_mgr
            .register(vec![Contact::email(email)], tos_agreed)
            .await?;

        Ok(account.id)
    }

    async fn new_order(&self, account_id: &str, domains: &[String]) -> Result<(String, Order)> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;
        let order_mgr = OrderManager::new(
            &account_mgr,
            &dir_mgr,
            &nonce_mgr,
            &self.http_client,
            account_id.to_string(),
        );

        let request = NewOrderRequest::new(domains.to_vec());
        order_mgr.create_order(&request).await
    }

    async fn fetch_authorization(&self, account_id: &str, url: &str) -> Result<Authorization> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;
        let order_mgr = OrderManager::new(
            &account_mgr,
            &dir_mgr,
            &nonce_mgr,
            &self.http_client,
            account_id.to_string(),
        );

        order_mgr.get_authorization(url).await
    }

    async fn update_challenge(&self, account_id: &str, challenge_url: &str) -> Result<Challenge> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;
        let order_mgr = OrderManager::new(
            &account_mgr,
            &dir_mgr,
            &nonce_mgr,
            &self.http_client,
            account_id.to_string(),
        );

        order_mgr.respond_to_challenge(challenge_url).await
    }

    async fn finalize_order(
        &self,
        account_id: &str,
        finalize_url: &str,
        csr_der: &[u8],
    ) -> Result<Order> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;
        let order_mgr = OrderManager::new(
            &account_mgr,
            &dir_mgr,
            &nonce_mgr,
            &self.http_client,
            account_id.to_string(),
        );

        order_mgr.finalize_order(finalize_url, csr_der).await
    }

    async fn poll_order(
        &self,
        account_id: &str,
        order_url: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<Order> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;
        let order_mgr = OrderManager::new(
            &account_mgr,
            &dir_mgr,
            &nonce_mgr,
            &self.http_client,
            account_id.to_string(),
        );

        order_mgr.poll_order(order_url, max_attempts, interval).await
    }

    async fn fetch_certificates(&self, account_id: &str, certificate_url: &str) -> Result<String> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;
        let order_mgr = OrderManager::new(
            &account_mgr,
            &dir_mgr,
            &nonce_mgr,
            &self.http_client,
            account_id.to_string(),
        );

        order_mgr.download_certificate(certificate_url).await
    }

    async fn revoke_certificate(
        &self,
        account_id: &str,
        certificate_der: Vec<u8>,
        reason: Option<RevocationReason>,
    ) -> Result<()> {
        let dir_mgr = self.directory_manager();
        let nonce_mgr = self.nonce_manager(&dir_mgr).await?;
        let account_mgr = AccountManager::new(&self.key_pair, &nonce_mgr, &dir_mgr, &self.http_client)?;

        let mut revocation = CertificateRevocation::new(&account_mgr, account_id, certificate_der);
        if let Some(reason) = reason {
            revocation = revocation.with_reason(reason);
        }
        revocation.revoke().await
    }

    fn key_authorization_digest(&self, token: &str) -> Result<String> {
        let jwk = Jwk::new_ed25519(URL_SAFE_NO_PAD.encode(self.key_pair.public_key_bytes()));
        let thumbprint = jwk.thumbprint_sha256()?;
        Sha256Hash::hash_base64(format!("{token}.{thumbprint}").as_bytes())
    }
}

/// Builds a [`RealAcmeClient`] bound to the operator's configured directory
/// for whatever account key the caller supplies.
#[derive(Clone)]
pub struct RealAcmeClientFactory {
    directory_url: String,
    http_client: reqwest::Client,
}

impl RealAcmeClientFactory {
    pub fn new(directory_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            directory_url: directory_url.into(),
            http_client,
        }
    }
}

impl AcmeClientFactory for RealAcmeClientFactory {
    fn build(&self, key_pair: KeyPair) -> Arc<dyn AcmeClientAdapter> {
        Arc::new(RealAcmeClient::new(
            self.directory_url.clone(),
            key_pair,
            self.http_client.clone(),
        ))
    }
}
