//! ACME Client Adapter: a thin, test-doubleable façade over the ACME v2
//! protocol. Reconcilers talk to this trait, never to `protocol`/`account`/
//! `order` directly, so tests can bind a canned implementation instead of a
//! network client.
pub mod mock;
pub mod real;

pub use mock::{MockAcmeClient, MockAcmeClientFactory};
pub use real::{RealAcmeClient, RealAcmeClientFactory};

use crate::account::KeyPair;
use crate::error::Result;
use crate::order::{Authorization, Challenge, Order};
use crate::types::RevocationReason;
use async_trait::async_trait;
use std::sync::Arc;

/// Mirrors RFC 8555 semantics the reconcilers need. Every method is
/// state-less from the caller's perspective: the account id (`kid`) is
/// passed in rather than cached on the adapter, since a `CertificateRequest`
/// reconciler may be juggling several accounts across the fleet.
#[async_trait]
pub trait AcmeClientAdapter: Send + Sync {
    /// Idempotent create-or-update: register the account if unknown to the
    /// CA, or confirm contact/ToS state if it's already registered. Returns
    /// the account URL used as `kid` in subsequent requests.
    async fn update_account(&self, email: &str, tos_agreed: bool) -> Result<String>;

    /// Identifiers -> order with pending authorizations.
    async fn new_order(&self, account_id: &str, domains: &[String]) -> Result<(String, Order)>;

    /// URL -> Authorization{Identifier, Challenges[]}.
    async fn fetch_authorization(&self, account_id: &str, url: &str) -> Result<Authorization>;

    /// Signal the CA to validate the named challenge. Triggers polling on
    /// the caller's side; does not block until validation completes.
    async fn update_challenge(&self, account_id: &str, challenge_url: &str) -> Result<Challenge>;

    /// CSR + order -> populated order (status becomes `processing` then
    /// `valid` as the CA signs).
    async fn finalize_order(
        &self,
        account_id: &str,
        finalize_url: &str,
        csr_der: &[u8],
    ) -> Result<Order>;

    /// Poll an order until it reaches `ready`, `valid`, or `invalid`.
    async fn poll_order(
        &self,
        account_id: &str,
        order_url: &str,
        max_attempts: u32,
        interval: std::time::Duration,
    ) -> Result<Order>;

    /// URL -> ordered chain, leaf-first, PEM encoded.
    async fn fetch_certificates(&self, account_id: &str, certificate_url: &str) -> Result<String>;

    /// Certificate (DER) + reason code.
    async fn revoke_certificate(
        &self,
        account_id: &str,
        certificate_der: Vec<u8>,
        reason: Option<RevocationReason>,
    ) -> Result<()>;

    /// RFC 8555 §8.1 key authorization digest for a DNS-01 challenge token:
    /// base64url(SHA-256(token + "." + thumbprint)). Pure and synchronous;
    /// the adapter already holds (or fakes) the account's key material.
    fn key_authorization_digest(&self, token: &str) -> Result<String>;
}

/// Shared construction inputs for a real adapter: the account's signing key
/// and the CA's directory URL. Kept separate from `RealAcmeClient` itself so
/// `config.rs` can build one value and pass it around.
#[derive(Clone)]
pub struct AcmeEndpoint {
    pub directory_url: String,
}

impl AcmeEndpoint {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
        }
    }
}

/// Builds an adapter bound to a specific account key. ACME account material
/// lives per-CertificateRequest (spec §5), so the reconciler builds a fresh
/// adapter for every reconcile rather than sharing one across accounts.
pub trait AcmeClientFactory: Send + Sync {
    fn build(&self, key_pair: KeyPair) -> Arc<dyn AcmeClientAdapter>;
}
