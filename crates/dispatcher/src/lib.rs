//! SumLoop Dispatcher
//!
//! Tracks live workers through their heartbeats and routes each client request
//! to the least-loaded one.

pub mod health;
pub mod registry;
pub mod router;
pub mod server;
pub mod worker_client;

pub use health::HealthChecker;
pub use registry::{ServerRegistry, WorkerRecord};
pub use router::{least_loaded, Router};
pub use server::DispatcherHandler;
pub use worker_client::WorkerClient;

use std::net::SocketAddr;
use std::sync::Arc;
use sumloop_common::config::DispatcherConfig;
use sumloop_common::{ConnectionListener, MetricsRegistry, Result, SumLoopConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A bound dispatcher, ready to serve
pub struct Dispatcher {
    config: DispatcherConfig,
    listener: ConnectionListener,
    registry: Arc<ServerRegistry>,
    metrics: MetricsRegistry,
}

impl Dispatcher {
    /// Bind the dispatcher's listening socket
    pub async fn bind(config: &SumLoopConfig, metrics: MetricsRegistry) -> Result<Self> {
        let dispatcher_config = config.dispatcher_config()?.clone();
        let listener = ConnectionListener::bind(
            &config.listen_address(),
            config.listener_config(),
            metrics.listener.clone(),
        )
        .await?;
        let registry = Arc::new(ServerRegistry::new(
            metrics.dispatcher.registered_workers.clone(),
        ));

        Ok(Self {
            config: dispatcher_config,
            listener,
            registry,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ServerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Serve until `shutdown` is cancelled, then drain in-flight connections
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("Dispatcher listening on {}", self.local_addr()?);

        let health_shutdown = shutdown.child_token();
        let health = HealthChecker::new(
            Arc::clone(&self.registry),
            &self.config,
            self.metrics.dispatcher.workers_evicted.clone(),
        )
        .spawn(health_shutdown.clone());

        let router = Router::new(
            Arc::clone(&self.registry),
            WorkerClient::new(&self.config),
            self.metrics.dispatcher.clone(),
        );
        let handler = Arc::new(DispatcherHandler::new(
            Arc::clone(&self.registry),
            router,
            self.metrics.dispatcher.clone(),
        ));

        let result = self.listener.run(handler, shutdown).await;

        health_shutdown.cancel();
        if let Err(e) = health.await {
            warn!("Health checker ended abnormally: {}", e);
        }

        info!(
            "Dispatcher stopped with {} registered workers",
            self.registry.len()
        );
        result
    }
}
