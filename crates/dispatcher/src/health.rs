//! Health checker
//!
//! Periodically evicts workers whose last heartbeat is older than the staleness
//! threshold. A dead worker therefore disappears from routing within
//! `staleness_threshold + health_check_interval` of its last heartbeat.

use crate::registry::ServerRegistry;
use prometheus::IntCounter;
use std::sync::Arc;
use std::time::Duration;
use sumloop_common::config::DispatcherConfig;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background sweeper over the registry
pub struct HealthChecker {
    registry: Arc<ServerRegistry>,
    interval: Duration,
    staleness_threshold: Duration,
    evicted: IntCounter,
}

impl HealthChecker {
    pub fn new(registry: Arc<ServerRegistry>, config: &DispatcherConfig, evicted: IntCounter) -> Self {
        Self {
            registry,
            interval: config.health_check_interval(),
            staleness_threshold: config.staleness_threshold(),
            evicted,
        }
    }

    /// Evict every stale worker, returning the evicted ids
    pub fn sweep(&self) -> Vec<u32> {
        let mut evicted = Vec::new();

        for record in self.registry.snapshot() {
            if record.heartbeat_age() <= self.staleness_threshold {
                continue;
            }

            if let Some(removed) = self
                .registry
                .remove_if_stale(record.worker_id, self.staleness_threshold)
            {
                warn!(
                    "Evicting worker {} at {}: no heartbeat for {:?}",
                    removed.worker_id,
                    removed.endpoint(),
                    removed.heartbeat_age()
                );
                self.evicted.inc();
                evicted.push(removed.worker_id);
            }
        }

        debug!(
            "Health sweep done: {} evicted, {} live",
            evicted.len(),
            self.registry.len()
        );
        evicted
    }

    /// Start sweeping; the first sweep runs one interval after start
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting health checks (interval: {:?}, staleness threshold: {:?})",
                self.interval, self.staleness_threshold
            );

            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.sweep();
            }

            info!("Health checker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerRecord;
    use prometheus::IntGauge;
    use sumloop_proto::Heartbeat;

    fn setup() -> (Arc<ServerRegistry>, HealthChecker) {
        let registry = Arc::new(ServerRegistry::new(
            IntGauge::new("registered_workers", "test").unwrap(),
        ));
        let config = DispatcherConfig::default();
        let checker = HealthChecker::new(
            Arc::clone(&registry),
            &config,
            IntCounter::new("workers_evicted", "test").unwrap(),
        );
        (registry, checker)
    }

    fn beat(registry: &ServerRegistry, worker_id: u32) {
        let heartbeat = Heartbeat {
            worker_id,
            port: 9000,
            current_load: 0,
            total_requests: 0,
        };
        registry.upsert(WorkerRecord::from_heartbeat(&heartbeat, "127.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_workers() {
        let (registry, checker) = setup();
        beat(&registry, 1);
        tokio::time::advance(Duration::from_secs(10)).await;
        beat(&registry, 2);

        assert!(checker.sweep().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(checker.sweep(), vec![1]);
        assert_eq!(registry.snapshot()[0].worker_id, 2);
        assert_eq!(checker.evicted.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_worker_gone_within_threshold_plus_interval() {
        let (registry, checker) = setup();
        let shutdown = CancellationToken::new();
        let handle = checker.spawn(shutdown.clone());

        beat(&registry, 1);
        tokio::time::sleep(Duration::from_secs(15 + 10 + 1)).await;
        assert!(registry.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_worker_survives() {
        let (registry, checker) = setup();
        let shutdown = CancellationToken::new();
        let handle = checker.spawn(shutdown.clone());

        for _ in 0..12 {
            beat(&registry, 4);
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        assert_eq!(registry.len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
