//! Server registry
//!
//! Live view of every worker that has heartbeated recently, keyed by worker id.
//! Heartbeat handlers write, the router reads and the health checker deletes;
//! all of them go through the lock owned here.

use parking_lot::RwLock;
use prometheus::IntGauge;
use std::collections::HashMap;
use std::time::Duration;
use sumloop_proto::{Heartbeat, WorkerStatus};
use tokio::time::Instant;
use tracing::{debug, info};

/// Last known state of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub worker_id: u32,

    /// IP the worker's heartbeat came from
    pub address: String,

    /// Port the worker accepts forwarded requests on
    pub port: u16,

    pub current_load: u32,
    pub total_requests: u64,
    pub last_heartbeat_at: Instant,
}

impl WorkerRecord {
    /// Build a record from a heartbeat received now
    pub fn from_heartbeat(heartbeat: &Heartbeat, address: impl Into<String>) -> Self {
        Self {
            worker_id: heartbeat.worker_id,
            address: address.into(),
            port: heartbeat.port,
            current_load: heartbeat.current_load,
            total_requests: heartbeat.total_requests,
            last_heartbeat_at: Instant::now(),
        }
    }

    /// `address:port` for forwarding
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat_at.elapsed()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.worker_id,
            address: self.address.clone(),
            port: self.port,
            current_load: self.current_load,
            total_requests: self.total_requests,
            last_heartbeat_age_ms: self.heartbeat_age().as_millis() as u64,
        }
    }
}

/// Concurrent map of live workers
#[derive(Debug)]
pub struct ServerRegistry {
    workers: RwLock<HashMap<u32, WorkerRecord>>,
    registered: IntGauge,
}

impl ServerRegistry {
    /// Create an empty registry reporting its size through `registered`
    pub fn new(registered: IntGauge) -> Self {
        registered.set(0);
        Self {
            workers: RwLock::new(HashMap::new()),
            registered,
        }
    }

    /// Insert or replace the record for `record.worker_id`
    pub fn upsert(&self, record: WorkerRecord) {
        let mut workers = self.workers.write();
        let worker_id = record.worker_id;
        if workers.insert(worker_id, record).is_none() {
            info!("Registered worker {}", worker_id);
        } else {
            debug!("Refreshed worker {}", worker_id);
        }
        self.registered.set(workers.len() as i64);
    }

    /// Remove a worker; returns the removed record, if any
    pub fn remove(&self, worker_id: u32) -> Option<WorkerRecord> {
        let mut workers = self.workers.write();
        let removed = workers.remove(&worker_id);
        self.registered.set(workers.len() as i64);
        removed
    }

    /// Remove a worker only if its heartbeat is still older than `threshold`.
    ///
    /// The age is re-checked under the write lock so a heartbeat that lands
    /// between a sweep's snapshot and this call keeps the worker alive.
    pub fn remove_if_stale(&self, worker_id: u32, threshold: Duration) -> Option<WorkerRecord> {
        let mut workers = self.workers.write();
        let stale = workers
            .get(&worker_id)
            .is_some_and(|record| record.heartbeat_age() > threshold);
        if !stale {
            return None;
        }

        let removed = workers.remove(&worker_id);
        self.registered.set(workers.len() as i64);
        removed
    }

    /// Copy of every record at one instant
    pub fn snapshot(&self) -> Vec<WorkerRecord> {
        self.workers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> ServerRegistry {
        ServerRegistry::new(IntGauge::new("registered_workers", "test").unwrap())
    }

    fn heartbeat(worker_id: u32, current_load: u32, total_requests: u64) -> Heartbeat {
        Heartbeat {
            worker_id,
            port: 9000 + worker_id as u16,
            current_load,
            total_requests,
        }
    }

    #[test]
    fn test_snapshot_holds_latest_heartbeats() {
        let registry = registry();
        registry.upsert(WorkerRecord::from_heartbeat(&heartbeat(1, 0, 0), "10.0.0.1"));
        registry.upsert(WorkerRecord::from_heartbeat(&heartbeat(2, 4, 10), "10.0.0.2"));
        registry.upsert(WorkerRecord::from_heartbeat(&heartbeat(1, 3, 7), "10.0.0.1"));

        let mut snapshot = registry.snapshot();
        snapshot.sort_by_key(|r| r.worker_id);

        assert_eq!(snapshot.len(), 2);
        assert_eq!((snapshot[0].worker_id, snapshot[0].current_load, snapshot[0].total_requests), (1, 3, 7));
        assert_eq!((snapshot[1].worker_id, snapshot[1].current_load, snapshot[1].total_requests), (2, 4, 10));
        assert_eq!(snapshot[1].endpoint(), "10.0.0.2:9002");
        assert_eq!(registry.registered.get(), 2);
    }

    #[test]
    fn test_concurrent_upserts() {
        let registry = Arc::new(registry());

        std::thread::scope(|scope| {
            for worker_id in 0..32 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    for load in 0..50 {
                        registry.upsert(WorkerRecord::from_heartbeat(
                            &heartbeat(worker_id, load, u64::from(load)),
                            "127.0.0.1",
                        ));
                    }
                });
            }
        });

        assert_eq!(registry.len(), 32);
        assert!(registry.snapshot().iter().all(|r| r.current_load == 49));
        assert_eq!(registry.registered.get(), 32);
    }

    #[test]
    fn test_remove() {
        let registry = registry();
        assert!(registry.remove(5).is_none());

        registry.upsert(WorkerRecord::from_heartbeat(&heartbeat(5, 0, 0), "127.0.0.1"));
        assert_eq!(registry.remove(5).map(|r| r.worker_id), Some(5));
        assert!(registry.is_empty());
        assert_eq!(registry.registered.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_if_stale() {
        let registry = registry();
        registry.upsert(WorkerRecord::from_heartbeat(&heartbeat(1, 0, 0), "127.0.0.1"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(registry.remove_if_stale(1, Duration::from_secs(15)).is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(registry.remove_if_stale(1, Duration::from_secs(15)).is_some());
        assert!(registry.remove_if_stale(1, Duration::from_secs(15)).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_heartbeat_age() {
        let registry = registry();
        registry.upsert(WorkerRecord::from_heartbeat(&heartbeat(3, 2, 9), "127.0.0.1"));
        tokio::time::advance(Duration::from_millis(1500)).await;

        let status = registry.snapshot()[0].status();
        assert_eq!(status.worker_id, 3);
        assert_eq!(status.current_load, 2);
        assert_eq!(status.last_heartbeat_age_ms, 1500);
    }
}
