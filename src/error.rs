/// Error handling for the certificate fleet operator.
use thiserror::Error;

/// Result type used throughout the operator.
pub type Result<T> = std::result::Result<T, AcmeError>;

/// Error types produced by the operator's reconcile pipelines.
///
/// Variants are grouped so `classify()` can map them onto the retry policy
/// described in spec §7 without re-deriving it at every call site.
#[derive(Error, Debug)]
pub enum AcmeError {
    /// Protocol-level error from the ACME server.
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Account-related error (registration, lookup, key material).
    #[error("ACME account error: {0}")]
    Account(String),

    /// Order creation or processing error.
    #[error("ACME order error: {status}, detail: {detail}")]
    Order { status: String, detail: String },

    /// DNS-01 challenge preparation or validation failed.
    #[error("DNS-01 challenge failed for {domain}: {reason}")]
    Challenge { domain: String, reason: String },

    /// The literal "service in maintenance" error body from the CA.
    #[error("ACME CA reports maintenance: {0}")]
    AcmeMaintenance(String),

    /// Certificate parsing, chain, or SAN-scoping error.
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Cryptographic operation error (key generation, CSR, signing).
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// DNS provider error (zone lookup, TXT record write/delete).
    #[error("DNS provider error: {0}")]
    Dns(String),

    /// DNS-over-HTTPS propagation check error.
    #[error("DNS propagation check error: {0}")]
    Propagation(String),

    /// Secret read/write error.
    #[error("Secret store error: {0}")]
    Secret(String),

    /// HTTP transport error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Kubernetes API error (includes optimistic-concurrency conflicts).
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rate limited by the ACME server.
    #[error("Rate limited, retry after: {0:?}")]
    RateLimited(Option<std::time::Duration>),

    /// Malformed input to a low-level protocol routine (e.g. a JWK missing
    /// a required member). Distinct from `InvalidSpec`, which is about the
    /// reconciled resource's spec rather than wire-level data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Spec error: the resource's spec is self-contradictory and will
    /// never succeed without a spec change (e.g. empty DnsNames, or
    /// ACMEDNSDomain not a suffix of a DnsName).
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Operation timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Not found error (treated as non-fatal by most callers).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid operator configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// PEM encoding/decoding error.
    #[error("PEM error: {0}")]
    Pem(String),

    /// A mutation was issued but its effect isn't observable yet (e.g. a
    /// delete was sent but the owned resources haven't disappeared from a
    /// subsequent list). Retry shortly rather than treating this as fatal.
    #[error("Pending: {0}")]
    Pending(String),
}

/// How a reconciler should respond to an [`Error`], per spec §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry with the framework's exponential backoff; do not touch status.
    Transient,
    /// Retry with backoff; bump the maintenance counter and add a one-shot
    /// status condition.
    Maintenance,
    /// Retry after a longer, fixed delay; record a status condition.
    Validation,
    /// Do not retry until the spec changes; record a fatal status.
    Spec,
    /// Swallow: a Kubernetes conflict or not-found race. The framework will
    /// redeliver the event.
    Swallowed,
}

impl AcmeError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        AcmeError::Protocol(msg.into())
    }

    pub fn account<S: Into<String>>(msg: S) -> Self {
        AcmeError::Account(msg.into())
    }

    pub fn order<S: Into<String>>(status: S, detail: S) -> Self {
        AcmeError::Order {
            status: status.into(),
            detail: detail.into(),
        }
    }

    pub fn challenge<S: Into<String>>(domain: S, reason: S) -> Self {
        AcmeError::Challenge {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub fn certificate<S: Into<String>>(msg: S) -> Self {
        AcmeError::Certificate(msg.into())
    }

    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        AcmeError::Crypto(msg.into())
    }

    pub fn dns<S: Into<String>>(msg: S) -> Self {
        AcmeError::Dns(msg.into())
    }

    pub fn propagation<S: Into<String>>(msg: S) -> Self {
        AcmeError::Propagation(msg.into())
    }

    pub fn secret<S: Into<String>>(msg: S) -> Self {
        AcmeError::Secret(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        AcmeError::Transport(msg.into())
    }

    pub fn invalid_spec<S: Into<String>>(msg: S) -> Self {
        AcmeError::InvalidSpec(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        AcmeError::InvalidInput(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        AcmeError::Timeout(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        AcmeError::NotFound(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        AcmeError::Configuration(msg.into())
    }

    pub fn pem<S: Into<String>>(msg: S) -> Self {
        AcmeError::Pem(msg.into())
    }

    pub fn pending<S: Into<String>>(msg: S) -> Self {
        AcmeError::Pending(msg.into())
    }

    /// The well-known ACME "service in maintenance" error body, recognised
    /// by substring match per spec §4.3/§7.
    pub fn is_acme_maintenance(text: &str) -> bool {
        let lowered = text.to_ascii_lowercase();
        lowered.contains("service is currently unavailable for maintenance")
            || lowered.contains("service in maintenance")
    }

    /// Classify this error per the retry taxonomy in spec §7.
    pub fn classify(&self) -> Disposition {
        match self {
            AcmeError::Kube(kube::Error::Api(resp))
                if resp.code == 409 || resp.code == 404 =>
            {
                Disposition::Swallowed
            }
            AcmeError::AcmeMaintenance(_) => Disposition::Maintenance,
            AcmeError::InvalidSpec(_) => Disposition::Spec,
            AcmeError::Challenge { .. } | AcmeError::Propagation(_) | AcmeError::Dns(_) => {
                Disposition::Validation
            }
            AcmeError::Protocol(_)
            | AcmeError::Account(_)
            | AcmeError::Order { .. }
            | AcmeError::Transport(_)
            | AcmeError::RateLimited(_)
            | AcmeError::Timeout(_)
            | AcmeError::Kube(_)
            | AcmeError::Io(_)
            | AcmeError::Json(_)
            | AcmeError::InvalidInput(_)
            | AcmeError::Secret(_) => Disposition::Transient,
            AcmeError::Certificate(_) | AcmeError::Crypto(_) | AcmeError::Pem(_) => Disposition::Spec,
            AcmeError::NotFound(_) => Disposition::Swallowed,
            AcmeError::Configuration(_) => Disposition::Transient,
            AcmeError::Pending(_) => Disposition::Transient,
        }
    }
}
