//! Worker client for forwarding requests from the dispatcher to workers

use crate::registry::WorkerRecord;
use sumloop_common::config::DispatcherConfig;
use sumloop_common::error::{Result, SumLoopError};
use sumloop_common::{exchange, ExchangeTimeouts};
use tracing::trace;

/// Single-attempt forwarder.
///
/// Every request opens a fresh connection to the selected worker, writes the
/// request line and relays whatever single line comes back.
#[derive(Debug, Clone, Copy)]
pub struct WorkerClient {
    timeouts: ExchangeTimeouts,
}

impl WorkerClient {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            timeouts: ExchangeTimeouts::new(config.connect_timeout(), config.forward_timeout()),
        }
    }

    /// Forward `line` to `worker` and return its reply untouched
    pub async fn forward(&self, worker: &WorkerRecord, line: &str) -> Result<String> {
        let endpoint = worker.endpoint();
        trace!("Forwarding '{}' to worker {} at {}", line, worker.worker_id, endpoint);

        exchange(&endpoint, line, self.timeouts)
            .await
            .map_err(|e| SumLoopError::transport(format!("Failed to forward request - {}", e)))
    }
}
