//! SumLoop Worker
//!
//! Computes `SUM` requests forwarded by the dispatcher and reports its load
//! back through periodic heartbeats.

pub mod heartbeat;
pub mod load;
pub mod processor;
pub mod server;

pub use heartbeat::HeartbeatEmitter;
pub use load::{LoadGuard, LoadSnapshot, LoadTracker};
pub use processor::SumProcessor;
pub use server::WorkerHandler;

use std::net::SocketAddr;
use std::sync::Arc;
use sumloop_common::config::WorkerConfig;
use sumloop_common::{ConnectionListener, MetricsRegistry, Result, SumLoopConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A bound worker, ready to serve
pub struct Worker {
    config: WorkerConfig,
    listener: ConnectionListener,
    tracker: Arc<LoadTracker>,
    metrics: MetricsRegistry,
}

impl Worker {
    /// Bind the worker's listening socket
    pub async fn bind(config: &SumLoopConfig, metrics: MetricsRegistry) -> Result<Self> {
        let worker_config = config.worker_config()?.clone();
        let listener = ConnectionListener::bind(
            &config.listen_address(),
            config.listener_config(),
            metrics.listener.clone(),
        )
        .await?;

        Ok(Self {
            config: worker_config,
            listener,
            tracker: Arc::new(LoadTracker::new()),
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn load_tracker(&self) -> Arc<LoadTracker> {
        Arc::clone(&self.tracker)
    }

    /// Serve requests and emit heartbeats until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let port = self.local_addr()?.port();
        info!(
            "Worker {} listening on port {}, reporting to {}",
            self.config.worker_id,
            port,
            self.config.dispatcher_endpoint()
        );

        let heartbeat_shutdown = shutdown.child_token();
        let heartbeat = HeartbeatEmitter::new(
            &self.config,
            port,
            Arc::clone(&self.tracker),
            self.metrics.worker.clone(),
        )
        .spawn(heartbeat_shutdown.clone());

        let handler = Arc::new(WorkerHandler::new(
            SumProcessor::new(self.config.worker_id, self.config.processing_delay()),
            Arc::clone(&self.tracker),
            self.metrics.worker.clone(),
        ));

        let result = self.listener.run(handler, shutdown).await;

        heartbeat_shutdown.cancel();
        if let Err(e) = heartbeat.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }

        let load = self.tracker.snapshot();
        info!(
            "Worker {} stopped after {} requests",
            self.config.worker_id, load.total_requests
        );
        result
    }
}
