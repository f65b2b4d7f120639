//! SUM request evaluation

use std::time::Duration;
use sumloop_common::{Result, SumLoopError};
use sumloop_proto::{Message, ProtocolError, SumResult};
use tracing::trace;

/// Evaluates `SUM` requests on behalf of one worker
#[derive(Debug, Clone)]
pub struct SumProcessor {
    worker_id: u32,
    processing_delay: Duration,
}

impl SumProcessor {
    /// Create a processor; `processing_delay` simulates work per request
    pub fn new(worker_id: u32, processing_delay: Duration) -> Self {
        Self {
            worker_id,
            processing_delay,
        }
    }

    /// Evaluate one request line.
    ///
    /// Unknown opcodes are protocol errors, bad operands and overflow are
    /// processing errors; both end up as `ERROR` replies.
    pub async fn process(&self, line: &str) -> Result<SumResult> {
        let request = match Message::parse(line)? {
            Message::Sum(request) => request,
            _ => return Err(ProtocolError::InvalidFormat.into()),
        };

        let sum = request
            .evaluate()
            .map_err(|e| SumLoopError::processing(e.to_string()))?;

        if !self.processing_delay.is_zero() {
            tokio::time::sleep(self.processing_delay).await;
        }

        trace!("Worker {} computed {} for {}", self.worker_id, sum, request);

        Ok(SumResult {
            sum,
            worker_id: self.worker_id,
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
        })
    }
}
