//! Worker connection handler

use crate::load::LoadTracker;
use crate::processor::SumProcessor;
use std::net::SocketAddr;
use std::sync::Arc;
use sumloop_common::metrics::WorkerMetrics;
use sumloop_common::LineHandler;
use sumloop_proto::Response;
use tracing::debug;

/// Answers each forwarded request while keeping the load counters current
pub struct WorkerHandler {
    processor: SumProcessor,
    tracker: Arc<LoadTracker>,
    metrics: WorkerMetrics,
}

impl WorkerHandler {
    pub fn new(processor: SumProcessor, tracker: Arc<LoadTracker>, metrics: WorkerMetrics) -> Self {
        Self {
            processor,
            tracker,
            metrics,
        }
    }
}

impl LineHandler for WorkerHandler {
    async fn handle(&self, line: String, peer: SocketAddr) -> String {
        let _load = self.tracker.begin();
        self.metrics.requests_total.inc();
        self.metrics.active_requests.inc();
        let timer = self.metrics.processing_duration.start_timer();

        let response = match self.processor.process(&line).await {
            Ok(result) => Response::Result(result),
            Err(e) => {
                self.metrics.requests_failed.inc();
                debug!("Request '{}' from {} failed: {}", line, peer, e);
                e.to_response()
            }
        };

        timer.observe_duration();
        self.metrics.active_requests.dec();
        response.to_string()
    }
}
