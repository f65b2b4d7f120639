//! Request routing and load balancing
//!
//! Each client request goes to the registered worker with the lowest reported
//! load. Ties go to the lowest worker id so selection is deterministic.

use crate::registry::{ServerRegistry, WorkerRecord};
use crate::worker_client::WorkerClient;
use std::sync::Arc;
use sumloop_common::error::{Result, SumLoopError};
use sumloop_common::metrics::DispatcherMetrics;
use tracing::{debug, warn};

/// Pick the least-loaded worker, lowest id first among equals
pub fn least_loaded(workers: &[WorkerRecord]) -> Option<&WorkerRecord> {
    workers
        .iter()
        .min_by_key(|worker| (worker.current_load, worker.worker_id))
}

/// Router for distributing requests across workers
pub struct Router {
    registry: Arc<ServerRegistry>,
    client: WorkerClient,
    metrics: DispatcherMetrics,
}

impl Router {
    pub fn new(registry: Arc<ServerRegistry>, client: WorkerClient, metrics: DispatcherMetrics) -> Self {
        Self {
            registry,
            client,
            metrics,
        }
    }

    /// Select the best worker for a request
    pub fn select_worker(&self) -> Result<WorkerRecord> {
        let workers = self.registry.snapshot();
        least_loaded(&workers)
            .cloned()
            .ok_or(SumLoopError::NoWorkersAvailable)
    }

    /// Forward `line` to the selected worker and return its reply.
    ///
    /// There is exactly one attempt: a failed forward is reported, not retried
    /// against another worker.
    pub async fn route(&self, line: &str) -> Result<String> {
        let worker = match self.select_worker() {
            Ok(worker) => worker,
            Err(e) => {
                self.metrics.no_workers_available.inc();
                warn!("Rejecting request: no workers registered");
                return Err(e);
            }
        };

        debug!(
            "Selected worker {} with load {}",
            worker.worker_id, worker.current_load
        );

        let timer = self.metrics.forward_duration.start_timer();
        let reply = self.client.forward(&worker, line).await;
        timer.observe_duration();

        match reply {
            Ok(reply) => {
                self.metrics.requests_routed.inc();
                Ok(reply)
            }
            Err(e) => {
                self.metrics.forward_failures.inc();
                warn!("Worker {} at {}: {}", worker.worker_id, worker.endpoint(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sumloop_common::config::DispatcherConfig;
    use sumloop_common::MetricsRegistry;
    use sumloop_proto::Heartbeat;

    fn record(worker_id: u32, current_load: u32) -> WorkerRecord {
        let heartbeat = Heartbeat {
            worker_id,
            port: 9000,
            current_load,
            total_requests: 0,
        };
        WorkerRecord::from_heartbeat(&heartbeat, "127.0.0.1")
    }

    fn router() -> (Arc<ServerRegistry>, Router) {
        let metrics = MetricsRegistry::new().dispatcher;
        let registry = Arc::new(ServerRegistry::new(metrics.registered_workers.clone()));
        let router = Router::new(
            Arc::clone(&registry),
            WorkerClient::new(&DispatcherConfig::default()),
            metrics,
        );
        (registry, router)
    }

    #[test]
    fn test_least_loaded_breaks_ties_by_id() {
        // A=1 (load 3), B=2 (load 1), C=3 (load 1)
        let workers = vec![record(3, 1), record(1, 3), record(2, 1)];
        assert_eq!(least_loaded(&workers).map(|w| w.worker_id), Some(2));
        assert!(least_loaded(&[]).is_none());
    }

    #[test]
    fn test_router_worker_selection() {
        let (registry, router) = router();
        registry.upsert(record(1, 3));
        registry.upsert(record(2, 1));
        registry.upsert(record(3, 1));

        assert_eq!(router.select_worker().unwrap().worker_id, 2);

        registry.upsert(record(2, 5));
        assert_eq!(router.select_worker().unwrap().worker_id, 3);
    }

    #[tokio::test]
    async fn test_route_with_empty_registry() {
        let (_registry, router) = router();

        let err = router.route("SUM:1,2").await.unwrap_err();
        assert_eq!(err.to_response().to_string(), "ERROR:No servers available");
        assert_eq!(router.metrics.no_workers_available.get(), 1);
        assert_eq!(router.metrics.forward_failures.get(), 0);
    }
}
