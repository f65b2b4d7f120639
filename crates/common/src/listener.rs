//! Connection listener with a bounded handler pool
//!
//! Both the dispatcher and the workers accept TCP connections that carry exactly one
//! request line and expect exactly one response line. The listener owns the accept
//! loop, the pool of handler slots and graceful shutdown; what a line means is up to
//! the [`LineHandler`] plugged into it.
//!
//! Per connection: accepted, request read, handler run, response written, closed.
//! There is no way back to reading a second request.

use crate::config::{ListenerConfig, SaturationPolicy};
use crate::error::{Result, SumLoopError};
use crate::metrics::ListenerMetrics;
use crate::transport::{read_line, write_line};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sumloop_proto::Response;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Reply sent when the pool is full and the policy is [`SaturationPolicy::Reject`]
pub const SERVER_BUSY: &str = "Server busy";

/// Turns one request line into one reply line
pub trait LineHandler: Send + Sync + 'static {
    /// Handle a request line (terminator already stripped) received from `peer`.
    ///
    /// The returned string is written back as the single reply line.
    fn handle(&self, line: String, peer: SocketAddr) -> impl Future<Output = String> + Send;
}

/// TCP listener dispatching connections to a bounded pool of handler tasks
pub struct ConnectionListener {
    listener: TcpListener,
    config: ListenerConfig,
    metrics: ListenerMetrics,
}

impl ConnectionListener {
    /// Bind the listening socket. Failing here is fatal for the process.
    pub async fn bind(address: &str, config: ListenerConfig, metrics: ListenerMetrics) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| SumLoopError::transport(format!("Failed to bind {}: {}", address, e)))?;

        Ok(Self {
            listener,
            config,
            metrics,
        })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled, then wait for in-flight
    /// handlers to finish.
    pub async fn run<H: LineHandler>(self, handler: Arc<H>, shutdown: CancellationToken) -> Result<()> {
        let pool = Arc::new(Semaphore::new(self.config.max_concurrent_connections));
        let tracker = TaskTracker::new();
        let read_timeout = self.config.read_timeout();

        info!(
            "Listening on {} ({} handler slots, {:?} when saturated)",
            self.local_addr()?,
            self.config.max_concurrent_connections,
            self.config.saturation_policy
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        continue;
                    }
                },
            };

            self.metrics.connections_accepted.inc();
            trace!("Accepted connection from {}", peer);

            let permit = match self.config.saturation_policy {
                // Block the accept loop until a slot frees up; further clients wait in the backlog
                SaturationPolicy::Queue => tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(&pool).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                },
                SaturationPolicy::Reject => match Arc::clone(&pool).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.metrics.connections_rejected.inc();
                        debug!("Handler pool saturated, rejecting {}", peer);
                        tracker.spawn(reject(stream, peer, read_timeout));
                        continue;
                    }
                },
            };

            let handler = Arc::clone(&handler);
            let metrics = self.metrics.clone();
            tracker.spawn(async move {
                metrics.active_connections.inc();
                if let Err(e) = serve_connection(stream, peer, handler.as_ref(), read_timeout).await {
                    debug!("Connection from {} ended with error: {}", peer, e);
                }
                metrics.active_connections.dec();
                drop(permit);
            });
        }

        // Stop accepting before draining
        drop(self.listener);
        tracker.close();

        if !tracker.is_empty() {
            info!("Draining {} in-flight connections", tracker.len());
        }
        tracker.wait().await;

        info!("Listener stopped");
        Ok(())
    }
}

/// Token cancelled on Ctrl-C, for binaries to hand to their listeners and timers
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                token.cancel();
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    shutdown
}

async fn serve_connection<H: LineHandler>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: &H,
    read_timeout: Duration,
) -> Result<()> {
    let reply = match timeout(read_timeout, read_line(&mut stream)).await {
        Ok(Ok(Some(line))) => {
            trace!("Request from {}: {}", peer, line);
            handler.handle(line, peer).await
        }
        Ok(Ok(None)) => {
            trace!("{} closed the connection without a request", peer);
            return Ok(());
        }
        Ok(Err(e)) => e.to_response().to_string(),
        Err(_) => Response::error(format!("No request received within {:?}", read_timeout)).to_string(),
    };

    write_line(&mut stream, &reply).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn reject(mut stream: TcpStream, peer: SocketAddr, read_timeout: Duration) {
    // Consume the request so closing does not reset the connection under the reply
    let _ = timeout(read_timeout, read_line(&mut stream)).await;

    let reply = Response::error(SERVER_BUSY).to_string();
    if let Err(e) = write_line(&mut stream, &reply).await {
        debug!("Failed to send busy reply to {}: {}", peer, e);
    }
    let _ = stream.shutdown().await;
}
