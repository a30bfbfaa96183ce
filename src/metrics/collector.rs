//! Metrics collection using Prometheus
//!
//! Counters and gauges for the broker's connections, matches, claims and
//! probe endpoints. Everything is registered in a private registry that is
//! served from `/metrics`.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the broker
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Client connection metrics
    connection_metrics: ConnectionMetrics,

    /// Match and claim metrics
    match_metrics: MatchMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health status (0=unhealthy, 1=healthy)
    pub health_status: IntGauge,

    /// Probe endpoint requests by probe and result
    pub probe_requests_total: IntCounterVec,
}

/// Client connection metrics
#[derive(Clone)]
pub struct ConnectionMetrics {
    /// Currently open client connections
    pub connections_active: IntGauge,

    /// Client connections accepted since start
    pub connections_total: IntCounter,

    /// Connections that went away before their match completed
    pub connections_dropped_total: IntCounter,
}

/// Match and claim metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Matches formed
    pub matches_formed_total: IntCounter,

    /// Matches that reached a terminal state, by outcome
    pub matches_completed_total: IntCounterVec,

    /// Claim attempts by result
    pub claims_total: IntCounterVec,

    /// Claim round-trip time
    pub claim_duration_seconds: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with a custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let connection_metrics = ConnectionMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            connection_metrics,
            match_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn connections(&self) -> &ConnectionMetrics {
        &self.connection_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    /// Record a client connection opening
    pub fn record_connection_opened(&self) {
        self.connection_metrics.connections_total.inc();
        self.connection_metrics.connections_active.inc();
    }

    /// Record a client connection closing
    pub fn record_connection_closed(&self, dropped: bool) {
        self.connection_metrics.connections_active.dec();
        if dropped {
            self.connection_metrics.connections_dropped_total.inc();
        }
    }

    pub fn record_match_formed(&self) {
        self.match_metrics.matches_formed_total.inc();
    }

    /// Record a match reaching a terminal state
    pub fn record_match_completed(&self, claimed: bool) {
        let outcome = if claimed { "claimed" } else { "failed" };
        self.match_metrics
            .matches_completed_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a claim attempt and how long it took
    pub fn record_claim(&self, success: bool, duration: Duration) {
        let result = if success { "success" } else { "unavailable" };
        self.match_metrics
            .claims_total
            .with_label_values(&[result])
            .inc();
        self.match_metrics
            .claim_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a probe endpoint request
    pub fn record_probe(&self, probe: &str, ok: bool) {
        let result = if ok { "ok" } else { "unavailable" };
        self.service_metrics
            .probe_requests_total
            .with_label_values(&[probe, result])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("match_broker_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "match_broker_health_status",
            "Health status (0=unhealthy, 1=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let probe_requests_total = IntCounterVec::new(
            Opts::new(
                "match_broker_probe_requests_total",
                "Probe endpoint requests",
            ),
            &["probe", "result"],
        )?;
        registry.register(Box::new(probe_requests_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            probe_requests_total,
        })
    }
}

impl ConnectionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let connections_active = IntGauge::new(
            "match_broker_connections_active",
            "Currently open client connections",
        )?;
        registry.register(Box::new(connections_active.clone()))?;

        let connections_total = IntCounter::new(
            "match_broker_connections_total",
            "Client connections accepted",
        )?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_dropped_total = IntCounter::new(
            "match_broker_connections_dropped_total",
            "Client connections closed before their match completed",
        )?;
        registry.register(Box::new(connections_dropped_total.clone()))?;

        Ok(Self {
            connections_active,
            connections_total,
            connections_dropped_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_formed_total =
            IntCounter::new("match_broker_matches_formed_total", "Matches formed")?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let matches_completed_total = IntCounterVec::new(
            Opts::new(
                "match_broker_matches_completed_total",
                "Matches that reached a terminal state",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(matches_completed_total.clone()))?;

        let claims_total = IntCounterVec::new(
            Opts::new("match_broker_claims_total", "Server claim attempts"),
            &["result"],
        )?;
        registry.register(Box::new(claims_total.clone()))?;

        let claim_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "match_broker_claim_duration_seconds",
                "Time spent requesting a server claim",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(claim_duration_seconds.clone()))?;

        Ok(Self {
            matches_formed_total,
            matches_completed_total,
            claims_total,
            claim_duration_seconds,
        })
    }
}
