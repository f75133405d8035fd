use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::git::Service;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Transport {
    Http,
    Ssh,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ServiceLabel {
    UploadPack,
    ReceivePack,
}

impl From<Service> for ServiceLabel {
    fn from(service: Service) -> Self {
        match service {
            Service::UploadPack => Self::UploadPack,
            Service::ReceivePack => Self::ReceivePack,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Allowed,
    Denied,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub service: ServiceLabel,
    pub transport: Transport,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: ServiceLabel,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the gateway.
pub struct Metrics {
    pub git_requests_total: Family<RequestLabels, Counter>,
    pub authorization_total: Family<OutcomeLabels, Counter>,
    pub subprocess_failures_total: Family<ServiceLabels, Counter>,
    pub active_bridges: Gauge,
    pub tenant_stores_open: Gauge,
    pub tenant_bootstraps_total: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let git_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "forgegate_git_requests",
            "Git transport requests by service and transport",
            git_requests_total.clone(),
        );

        let authorization_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "forgegate_authorization",
            "Transport authorization decisions by outcome",
            authorization_total.clone(),
        );

        let subprocess_failures_total = Family::<ServiceLabels, Counter>::default();
        registry.register(
            "forgegate_subprocess_failures",
            "Git subprocesses that exited unsuccessfully or were killed",
            subprocess_failures_total.clone(),
        );

        let active_bridges: Gauge = Gauge::default();
        registry.register(
            "forgegate_active_bridges",
            "Git subprocesses currently bridged to a client",
            active_bridges.clone(),
        );

        let tenant_stores_open: Gauge = Gauge::default();
        registry.register(
            "forgegate_tenant_stores_open",
            "Tenant store handles held in the process-wide cache",
            tenant_stores_open.clone(),
        );

        let tenant_bootstraps_total: Gauge = Gauge::default();
        registry.register(
            "forgegate_tenant_bootstraps_total",
            "Tenant schema bootstraps executed since start",
            tenant_bootstraps_total.clone(),
        );

        Self {
            git_requests_total,
            authorization_total,
            subprocess_failures_total,
            active_bridges,
            tenant_stores_open,
            tenant_bootstraps_total,
        }
    }

    pub fn record_request(&self, service: Service, transport: Transport) {
        self.git_requests_total
            .get_or_create(&RequestLabels {
                service: service.into(),
                transport,
            })
            .inc();
    }

    pub fn record_authorization(&self, outcome: Outcome) {
        self.authorization_total
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }

    pub fn record_subprocess_failure(&self, service: Service) {
        self.subprocess_failures_total
            .get_or_create(&ServiceLabels {
                service: service.into(),
            })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`crate::AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all gateway metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
