//! Configuration for the fleet certificate manager.
//!
//! TOML file plus environment overrides, in the same shape the original
//! client config used: `Config::from_file`, `apply_env_overrides`,
//! `validate`.

use crate::error::{AcmeError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// How the DNS-over-HTTPS propagation check parses the resolver's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DohAnswerMode {
    /// Parse Cloudflare's `application/dns-json` answer shape and inspect
    /// the `Answer[].data` entries structurally.
    JsonSchema,
    /// Fall back to a raw substring search over the response body. Useful
    /// against resolvers that don't speak the JSON schema.
    Substring,
}

impl Default for DohAnswerMode {
    fn default() -> Self {
        DohAnswerMode::JsonSchema
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub acme: AcmeSettings,

    #[serde(default)]
    pub operator: OperatorSettings,

    #[serde(default)]
    pub dns_propagation: DnsPropagationSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// ACME CA connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeSettings {
    /// ACME directory URL.
    #[serde(default = "default_acme_directory")]
    pub directory: String,

    /// Agree to the CA's terms of service on account creation.
    #[serde(default = "default_true")]
    pub tos_agreed: bool,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            directory: default_acme_directory(),
            tos_agreed: default_true(),
        }
    }
}

/// Operator-wide settings sourced from the `certman-operator` ConfigMap and
/// environment, per spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSettings {
    /// ConfigMap key `default_notification_email_address`: contact email
    /// used when registering or reusing the shared ACME account.
    #[serde(default)]
    pub default_notification_email_address: String,

    /// `EXTRA_RECORD` env var: appends `<value>.<clusterName>.<baseDomain>`
    /// to the default control-plane certificate's domain set.
    #[serde(default)]
    pub extra_record: Option<String>,

    /// `WATCH_NAMESPACE`: comma-separated namespace list, empty for all.
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// `FEDRAMP` feature flag.
    #[serde(default)]
    pub fedramp: bool,

    /// `HOSTED_ZONE_ID` override for the AWS DNS driver's zone lookup.
    #[serde(default)]
    pub hosted_zone_id: Option<String>,

    /// Days before expiry to reissue, used when a `CertificateRequest`
    /// leaves `reissueBeforeDays` unset or non-positive.
    #[serde(default = "default_reissue_before_days")]
    pub reissue_before_days: u32,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            default_notification_email_address: String::new(),
            extra_record: None,
            watch_namespace: None,
            fedramp: false,
            hosted_zone_id: None,
            reissue_before_days: default_reissue_before_days(),
        }
    }
}

impl OperatorSettings {
    /// Parsed `WATCH_NAMESPACE` list; `None` means "all namespaces".
    pub fn watched_namespaces(&self) -> Option<Vec<String>> {
        let raw = self.watch_namespace.as_ref()?;
        if raw.trim().is_empty() {
            return None;
        }
        Some(raw.split(',').map(|s| s.trim().to_string()).collect())
    }
}

/// DNS-01 propagation check tuning, per spec §4.3 step 4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsPropagationSettings {
    #[serde(default = "default_doh_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_doh_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_doh_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub answer_mode: DohAnswerMode,

    #[serde(default = "default_doh_endpoint")]
    pub endpoint: String,
}

impl Default for DnsPropagationSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_doh_max_attempts(),
            retry_delay_secs: default_doh_retry_delay_secs(),
            request_timeout_secs: default_doh_request_timeout_secs(),
            answer_mode: DohAnswerMode::default(),
            endpoint: default_doh_endpoint(),
        }
    }
}

impl DnsPropagationSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Prometheus metrics transport, per spec §6 (`GET /metrics` on 8080).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_metrics_listen")]
    pub listen_addr: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_metrics_listen(),
        }
    }
}

fn default_acme_directory() -> String {
    "https://acme-v02.api.letsencrypt.org/directory".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reissue_before_days() -> u32 {
    crate::model::certificate_request::DEFAULT_REISSUE_BEFORE_DAYS
}

fn default_doh_max_attempts() -> u32 {
    5
}

fn default_doh_retry_delay_secs() -> u64 {
    30
}

fn default_doh_request_timeout_secs() -> u64 {
    10
}

fn default_doh_endpoint() -> String {
    "https://cloudflare-dns.com/dns-query".to_string()
}

fn default_metrics_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            acme: AcmeSettings::default(),
            operator: OperatorSettings::default(),
            dns_propagation: DnsPropagationSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AcmeError::configuration(format!("Failed to read config file: {e}")))?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AcmeError::configuration(format!("Failed to parse TOML: {e}")))
    }

    /// Apply environment variable overrides, matching the names spec §6
    /// gives for the operator's ambient configuration.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var("ACME_DIRECTORY_URL") {
            self.acme.directory = Self::expand_env_var(&url)?;
        }

        if let Ok(email) = env::var("DEFAULT_NOTIFICATION_EMAIL_ADDRESS") {
            self.operator.default_notification_email_address = email;
        }

        if let Ok(extra) = env::var("EXTRA_RECORD") {
            self.operator.extra_record = if extra.is_empty() { None } else { Some(extra) };
        }

        if let Ok(watch) = env::var("WATCH_NAMESPACE") {
            self.operator.watch_namespace = Some(watch);
        }

        if let Ok(fedramp) = env::var("FEDRAMP") {
            self.operator.fedramp = matches!(fedramp.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(zone) = env::var("HOSTED_ZONE_ID") {
            self.operator.hosted_zone_id = Some(zone);
        }

        if let Ok(listen) = env::var("METRICS_LISTEN_ADDR") {
            self.metrics.listen_addr = listen;
        }

        Ok(())
    }

    /// Expand `${VAR}` references using the process environment.
    pub fn expand_env_var(value: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|_| AcmeError::configuration("Invalid regex pattern"))?;

        let result = re
            .replace_all(value, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_else(|_| format!("${{{var_name}}}"))
            })
            .to_string();

        Ok(result)
    }

    pub fn validate(&self) -> Result<()> {
        if self.acme.directory.is_empty() {
            return Err(AcmeError::configuration("ACME directory URL cannot be empty"));
        }

        if self.dns_propagation.max_attempts == 0 {
            return Err(AcmeError::configuration(
                "dns_propagation.max_attempts must be greater than 0",
            ));
        }

        if self.operator.reissue_before_days == 0 {
            return Err(AcmeError::configuration(
                "operator.reissue_before_days must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn acme_directory(&self) -> &str {
        &self.acme.directory
    }
}
