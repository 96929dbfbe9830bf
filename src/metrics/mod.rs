/// Metrics and health endpoints, per spec §6: per-CA maintenance error
/// count, issuance duration histogram, per-CommonName valid-duration gauge,
/// issued-count counters, duplicate-issuance gauges, limited-support-cluster
/// gauge.
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Health status for the service
#[derive(Debug, Clone, Copy)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Metrics registry wrapper
pub struct MetricsRegistry {
    registry: Registry,
    pub requests_total: IntCounter,
    pub renewals_total: IntCounter,
    pub certs_managed: IntGauge,

    /// Counts the literal ACME "service in maintenance" error, per CA.
    pub letsencrypt_maintenance_error_count: IntCounter,
    /// Wall-clock duration of a full issuance pipeline run.
    pub issuance_duration_seconds: Histogram,
    /// Remaining validity of the last-issued cert, labelled `cn`,
    /// `certificaterequest_name`, `certificaterequest_namespace`.
    pub cert_valid_duration_seconds: IntGaugeVec,
    /// Successful issuances, labelled by CertificateRequest.
    pub certs_issued_total: IntCounterVec,
    /// Set when more than one CertificateRequest targets the same CN, a
    /// misconfiguration the operator can't resolve on its own.
    pub duplicate_issuance: IntGaugeVec,
    /// Set for a cluster whose platform only has partial DNS automation
    /// support (e.g. a manually-managed zone).
    pub limited_support_cluster: IntGaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();
        let requests_total = IntCounter::new("certfleet_requests_total", "Total requests").unwrap();
        let renewals_total = IntCounter::new("certfleet_renewals_total", "Total renewals").unwrap();
        let certs_managed = IntGauge::new("certfleet_certs_managed", "Managed cert count").unwrap();

        let letsencrypt_maintenance_error_count = IntCounter::new(
            "letsencrypt_maintenance_error_count",
            "ACME CA reported maintenance",
        )
        .unwrap();

        let issuance_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "certfleet_issuance_duration_seconds",
            "Time spent running the full issuance pipeline",
        ))
        .unwrap();

        let cert_valid_duration_seconds = IntGaugeVec::new(
            Opts::new(
                "certfleet_cert_valid_duration_seconds",
                "Remaining validity of the issued certificate",
            ),
            &["cn", "certificaterequest_name", "certificaterequest_namespace"],
        )
        .unwrap();

        let certs_issued_total = IntCounterVec::new(
            Opts::new("certfleet_certs_issued_total", "Successful issuances"),
            &["certificaterequest_name", "certificaterequest_namespace"],
        )
        .unwrap();

        let duplicate_issuance = IntGaugeVec::new(
            Opts::new(
                "certfleet_duplicate_issuance",
                "More than one CertificateRequest targets the same CN",
            ),
            &["cn"],
        )
        .unwrap();

        let limited_support_cluster = IntGaugeVec::new(
            Opts::new(
                "certfleet_limited_support_cluster",
                "Cluster whose platform has only partial DNS automation support",
            ),
            &["cluster"],
        )
        .unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(renewals_total.clone())).unwrap();
        registry.register(Box::new(certs_managed.clone())).unwrap();
        registry
            .register(Box::new(letsencrypt_maintenance_error_count.clone()))
            .unwrap();
        registry.register(Box::new(issuance_duration_seconds.clone())).unwrap();
        registry.register(Box::new(cert_valid_duration_seconds.clone())).unwrap();
        registry.register(Box::new(certs_issued_total.clone())).unwrap();
        registry.register(Box::new(duplicate_issuance.clone())).unwrap();
        registry.register(Box::new(limited_support_cluster.clone())).unwrap();

        Self {
            registry,
            requests_total,
            renewals_total,
            certs_managed,
            letsencrypt_maintenance_error_count,
            issuance_duration_seconds,
            cert_valid_duration_seconds,
            certs_issued_total,
            duplicate_issuance,
            limited_support_cluster,
        }
    }

    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&mf, &mut buffer).unwrap();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check response
pub fn health_status(status: HealthStatus) -> (&'static str, u16) {
    match status {
        HealthStatus::Healthy => ("ok", 200),
        HealthStatus::Degraded => ("degraded", 200),
        HealthStatus::Unhealthy => ("unhealthy", 503),
    }
}

/// Shared metrics type
pub type SharedMetrics = Arc<MetricsRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_registered_series_as_text() {
        let metrics = MetricsRegistry::new();
        metrics.letsencrypt_maintenance_error_count.inc();
        metrics
            .certs_issued_total
            .with_label_values(&["foo-testbundle", "ns"])
            .inc();

        let text = metrics.gather_text();
        assert!(text.contains("letsencrypt_maintenance_error_count"));
        assert!(text.contains("certfleet_certs_issued_total"));
    }
}
