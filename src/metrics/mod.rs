//! Metrics for the match broker
//!
//! Prometheus collectors for connections, matches, claims and probes.

pub mod collector;

pub use collector::{
    ConnectionMetrics, MatchMetrics, MetricsCollector, ServiceMetrics,
};
