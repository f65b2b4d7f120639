//! Metrics collection for SumLoop
//!
//! This module provides Prometheus metrics for observability.
//! The global [`METRICS`] instance is what the binaries use; components accept a
//! [`MetricsRegistry`] so tests can hand them an isolated one.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for SumLoop
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub dispatcher: DispatcherMetrics,
    pub worker: WorkerMetrics,
    pub listener: ListenerMetrics,
}

/// Dispatcher-specific metrics
#[derive(Debug, Clone)]
pub struct DispatcherMetrics {
    /// Heartbeats accepted into the registry
    pub heartbeats_received: IntCounter,

    /// Heartbeat lines that failed to parse
    pub malformed_heartbeats: IntCounter,

    /// Workers currently in the registry
    pub registered_workers: IntGauge,

    /// Workers removed by the health checker
    pub workers_evicted: IntCounter,

    /// Requests forwarded to a worker
    pub requests_routed: IntCounter,

    /// Requests rejected because the registry was empty
    pub no_workers_available: IntCounter,

    /// Forwards that failed to connect or timed out
    pub forward_failures: IntCounter,

    /// Client lines with an unknown opcode
    pub malformed_requests: IntCounter,

    /// Round trip to the selected worker
    pub forward_duration: Histogram,
}

/// Worker-specific metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Requests handled
    pub requests_total: IntCounter,

    /// Requests answered with an error
    pub requests_failed: IntCounter,

    /// Requests currently being handled
    pub active_requests: IntGauge,

    /// Time spent evaluating a request
    pub processing_duration: Histogram,

    /// Heartbeats acknowledged or at least delivered
    pub heartbeats_sent: IntCounter,

    /// Heartbeats that could not be delivered
    pub heartbeat_failures: IntCounter,
}

/// Connection listener metrics
#[derive(Debug, Clone)]
pub struct ListenerMetrics {
    /// Connections accepted
    pub connections_accepted: IntCounter,

    /// Connections turned away by the reject policy
    pub connections_rejected: IntCounter,

    /// Connections currently held by a handler
    pub active_connections: IntGauge,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("valid gauge definition");
    registry
        .register(Box::new(gauge.clone()))
        .expect("gauge registered once");
    gauge
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("valid histogram definition");
    registry
        .register(Box::new(histogram.clone()))
        .expect("histogram registered once");
    histogram
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        #[cfg(target_os = "linux")]
        {
            let process = prometheus::process_collector::ProcessCollector::for_self();
            if let Err(e) = registry.register(Box::new(process)) {
                tracing::debug!("Process collector unavailable: {}", e);
            }
        }

        let dispatcher = DispatcherMetrics {
            heartbeats_received: counter(
                &registry,
                "dispatcher_heartbeats_received_total",
                "Total number of heartbeats accepted",
            ),
            malformed_heartbeats: counter(
                &registry,
                "dispatcher_malformed_heartbeats_total",
                "Total number of heartbeats dropped as malformed",
            ),
            registered_workers: gauge(
                &registry,
                "dispatcher_registered_workers",
                "Current number of workers in the registry",
            ),
            workers_evicted: counter(
                &registry,
                "dispatcher_workers_evicted_total",
                "Total number of workers evicted for stale heartbeats",
            ),
            requests_routed: counter(
                &registry,
                "dispatcher_requests_routed_total",
                "Total number of requests forwarded to a worker",
            ),
            no_workers_available: counter(
                &registry,
                "dispatcher_no_workers_available_total",
                "Total requests rejected due to an empty registry",
            ),
            forward_failures: counter(
                &registry,
                "dispatcher_forward_failures_total",
                "Total forwards that failed at the transport level",
            ),
            malformed_requests: counter(
                &registry,
                "dispatcher_malformed_requests_total",
                "Total client lines with an invalid format",
            ),
            forward_duration: histogram(
                &registry,
                "dispatcher_forward_duration_seconds",
                "Round trip time to the selected worker",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            ),
        };

        let worker = WorkerMetrics {
            requests_total: counter(
                &registry,
                "worker_requests_total",
                "Total number of requests handled",
            ),
            requests_failed: counter(
                &registry,
                "worker_requests_failed_total",
                "Total number of requests answered with an error",
            ),
            active_requests: gauge(
                &registry,
                "worker_active_requests",
                "Current number of requests being handled",
            ),
            processing_duration: histogram(
                &registry,
                "worker_processing_duration_seconds",
                "Request processing duration in seconds",
                vec![0.001, 0.01, 0.05, 0.1, 0.15, 0.25, 0.5, 1.0],
            ),
            heartbeats_sent: counter(
                &registry,
                "worker_heartbeats_sent_total",
                "Total number of heartbeats delivered",
            ),
            heartbeat_failures: counter(
                &registry,
                "worker_heartbeat_failures_total",
                "Total number of heartbeats that could not be delivered",
            ),
        };

        let listener = ListenerMetrics {
            connections_accepted: counter(
                &registry,
                "listener_connections_accepted_total",
                "Total number of accepted connections",
            ),
            connections_rejected: counter(
                &registry,
                "listener_connections_rejected_total",
                "Total number of connections rejected while saturated",
            ),
            active_connections: gauge(
                &registry,
                "listener_active_connections",
                "Current number of connections being handled",
            ),
        };

        MetricsRegistry {
            registry,
            dispatcher,
            worker,
            listener,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
