//! Heartbeat emitter
//!
//! Pushes the worker's load to the dispatcher on a fixed period, starting
//! immediately. Emission is fire-and-forget: a failed heartbeat is logged and the
//! next one goes out on schedule, with no backoff and no catch-up.

use crate::load::LoadTracker;
use std::sync::Arc;
use std::time::Duration;
use sumloop_common::config::WorkerConfig;
use sumloop_common::metrics::WorkerMetrics;
use sumloop_common::{exchange, ExchangeTimeouts, Result};
use sumloop_proto::{Heartbeat, Response};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodic load reporter
pub struct HeartbeatEmitter {
    worker_id: u32,
    port: u16,
    dispatcher_endpoint: String,
    interval: Duration,
    timeouts: ExchangeTimeouts,
    tracker: Arc<LoadTracker>,
    metrics: WorkerMetrics,
}

impl HeartbeatEmitter {
    /// Create an emitter for a worker listening on `port`
    pub fn new(
        config: &WorkerConfig,
        port: u16,
        tracker: Arc<LoadTracker>,
        metrics: WorkerMetrics,
    ) -> Self {
        let timeout = config.heartbeat_timeout();
        Self {
            worker_id: config.worker_id,
            port,
            dispatcher_endpoint: config.dispatcher_endpoint(),
            interval: config.heartbeat_interval(),
            timeouts: ExchangeTimeouts::new(timeout, timeout),
            tracker,
            metrics,
        }
    }

    /// Build the heartbeat from a single load snapshot
    pub fn heartbeat(&self) -> Heartbeat {
        let load = self.tracker.snapshot();
        Heartbeat {
            worker_id: self.worker_id,
            port: self.port,
            current_load: load.current_load,
            total_requests: load.total_requests,
        }
    }

    /// Send one heartbeat and wait for the acknowledgement
    pub async fn emit(&self) -> Result<()> {
        let heartbeat = self.heartbeat();
        let reply = exchange(&self.dispatcher_endpoint, &heartbeat.to_string(), self.timeouts).await?;

        match Response::parse(&reply) {
            Ok(Response::Ack) => {}
            _ => debug!("Unexpected heartbeat reply from dispatcher: {}", reply),
        }

        self.metrics.heartbeats_sent.inc();
        debug!(
            "Heartbeat sent: load {}, total {}",
            heartbeat.current_load, heartbeat.total_requests
        );
        Ok(())
    }

    /// Start the heartbeat loop; it ends when `shutdown` is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting heartbeats for worker {} to {} (interval: {:?})",
                self.worker_id, self.dispatcher_endpoint, self.interval
            );

            // First tick fires immediately
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.emit().await {
                    self.metrics.heartbeat_failures.inc();
                    warn!("Failed to send heartbeat: {}", e);
                }
            }

            info!("Heartbeat emitter for worker {} stopped", self.worker_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sumloop_common::transport::{read_line, write_line};
    use sumloop_common::MetricsRegistry;
    use tokio::net::TcpListener;

    fn config(dispatcher_port: u16, interval_secs: u64) -> WorkerConfig {
        let mut config = WorkerConfig::new(7, "127.0.0.1", dispatcher_port);
        config.heartbeat_interval_secs = interval_secs;
        config.heartbeat_timeout_ms = 500;
        config
    }

    #[tokio::test]
    async fn test_first_heartbeat_is_immediate() {
        let dispatcher = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dispatcher_port = dispatcher.local_addr().unwrap().port();

        let tracker = Arc::new(LoadTracker::new());
        let _in_progress = tracker.begin();

        let metrics = MetricsRegistry::new().worker;
        let emitter = HeartbeatEmitter::new(
            &config(dispatcher_port, 3600),
            9100,
            Arc::clone(&tracker),
            metrics.clone(),
        );

        let shutdown = CancellationToken::new();
        let handle = emitter.spawn(shutdown.clone());

        let (mut stream, _) = tokio::time::timeout(Duration::from_secs(2), dispatcher.accept())
            .await
            .expect("heartbeat should arrive without waiting a full period")
            .unwrap();
        let line = read_line(&mut stream).await.unwrap().unwrap();
        write_line(&mut stream, "ACK").await.unwrap();

        assert_eq!(line, "HEARTBEAT:7:9100:1:1");

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(metrics.heartbeats_sent.get(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_failures_do_not_stop_emission() {
        let unused_port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let metrics = MetricsRegistry::new().worker;
        let emitter = HeartbeatEmitter::new(
            &config(unused_port, 1),
            9100,
            Arc::new(LoadTracker::new()),
            metrics.clone(),
        );

        let shutdown = CancellationToken::new();
        let handle = emitter.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!handle.is_finished());
        assert!(metrics.heartbeat_failures.get() >= 2);
        assert_eq!(metrics.heartbeats_sent.get(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_heartbeat_reflects_tracker() {
        let tracker = Arc::new(LoadTracker::new());
        let emitter = HeartbeatEmitter::new(
            &config(8080, 5),
            9001,
            Arc::clone(&tracker),
            MetricsRegistry::new().worker,
        );

        {
            let _a = tracker.begin();
            let _b = tracker.begin();
            assert_eq!(emitter.heartbeat().current_load, 2);
        }

        let heartbeat = emitter.heartbeat();
        assert_eq!(heartbeat.current_load, 0);
        assert_eq!(heartbeat.total_requests, 2);
        assert_eq!(heartbeat.to_string(), "HEARTBEAT:7:9001:0:2");
    }
}
