//! Dispatcher connection handler
//!
//! One line in, one line out: heartbeats update the registry and are answered
//! with `ACK`, `SUM` requests go through the router, `STATUS` lists the registry.

use crate::registry::{ServerRegistry, WorkerRecord};
use crate::router::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use sumloop_common::metrics::DispatcherMetrics;
use sumloop_common::{LineHandler, SumLoopError};
use sumloop_proto::{Heartbeat, Message, ProtocolError, Response};
use tracing::debug;

pub struct DispatcherHandler {
    registry: Arc<ServerRegistry>,
    router: Router,
    metrics: DispatcherMetrics,
}

impl DispatcherHandler {
    pub fn new(registry: Arc<ServerRegistry>, router: Router, metrics: DispatcherMetrics) -> Self {
        Self {
            registry,
            router,
            metrics,
        }
    }

    fn record_heartbeat(&self, heartbeat: &Heartbeat, peer: SocketAddr) -> Response {
        self.metrics.heartbeats_received.inc();
        self.registry
            .upsert(WorkerRecord::from_heartbeat(heartbeat, peer.ip().to_string()));
        Response::Ack
    }

    fn status(&self) -> Response {
        let mut workers: Vec<_> = self.registry.snapshot().iter().map(WorkerRecord::status).collect();
        workers.sort_by_key(|w| w.worker_id);
        Response::Status(workers)
    }
}

impl LineHandler for DispatcherHandler {
    async fn handle(&self, line: String, peer: SocketAddr) -> String {
        let response = match Message::parse(&line) {
            Ok(Message::Heartbeat(heartbeat)) => self.record_heartbeat(&heartbeat, peer),
            Ok(Message::Sum(_)) => match self.router.route(&line).await {
                Ok(reply) => return reply,
                Err(e) => e.to_response(),
            },
            Ok(Message::Status) => self.status(),
            Err(ProtocolError::MalformedHeartbeat(reason)) => {
                // Heartbeats have nobody to report to; acknowledge and move on
                self.metrics.malformed_heartbeats.inc();
                debug!("Dropping malformed heartbeat from {}: {}", peer, reason);
                Response::Ack
            }
            Err(e) => {
                self.metrics.malformed_requests.inc();
                debug!("Malformed request from {}: '{}'", peer, line);
                SumLoopError::from(e).to_response()
            }
        };

        response.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_client::WorkerClient;
    use sumloop_common::config::DispatcherConfig;
    use sumloop_common::MetricsRegistry;

    fn handler() -> DispatcherHandler {
        let metrics = MetricsRegistry::new().dispatcher;
        let registry = Arc::new(ServerRegistry::new(metrics.registered_workers.clone()));
        let router = Router::new(
            Arc::clone(&registry),
            WorkerClient::new(&DispatcherConfig::default()),
            metrics.clone(),
        );
        DispatcherHandler::new(registry, router, metrics)
    }

    fn peer() -> SocketAddr {
        "10.1.2.3:41000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_is_acknowledged_and_recorded() {
        let handler = handler();

        let reply = handler.handle("HEARTBEAT:4:9004:2:17".to_string(), peer()).await;
        assert_eq!(reply, "ACK");

        let snapshot = handler.registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].endpoint(), "10.1.2.3:9004");
        assert_eq!(snapshot[0].current_load, 2);
        assert_eq!(snapshot[0].total_requests, 17);
        assert_eq!(handler.metrics.heartbeats_received.get(), 1);
    }

    #[tokio::test]
    async fn test_malformed_heartbeat_is_dropped() {
        let handler = handler();

        let reply = handler.handle("HEARTBEAT:4:9004:2".to_string(), peer()).await;
        assert_eq!(reply, "ACK");
        assert!(handler.registry.is_empty());
        assert_eq!(handler.metrics.malformed_heartbeats.get(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let handler = handler();

        let reply = handler.handle("FOO:bar".to_string(), peer()).await;
        assert_eq!(reply, "ERROR:Invalid request format");
        assert_eq!(handler.metrics.malformed_requests.get(), 1);
    }

    #[tokio::test]
    async fn test_sum_without_workers() {
        let handler = handler();

        let reply = handler.handle("SUM:1,2,3".to_string(), peer()).await;
        assert_eq!(reply, "ERROR:No servers available");
    }

    #[tokio::test]
    async fn test_status_lists_workers_in_id_order() {
        let handler = handler();
        handler.handle("HEARTBEAT:9:9009:0:0".to_string(), peer()).await;
        handler.handle("HEARTBEAT:2:9002:1:5".to_string(), peer()).await;

        let reply = handler.handle("STATUS".to_string(), peer()).await;
        match Response::parse(&reply).unwrap() {
            Response::Status(workers) => {
                let ids: Vec<u32> = workers.iter().map(|w| w.worker_id).collect();
                assert_eq!(ids, vec![2, 9]);
                assert_eq!(workers[0].address, "10.1.2.3");
                assert_eq!(workers[0].total_requests, 5);
            }
            other => panic!("expected STATUS reply, got {:?}", other),
        }
    }
}
