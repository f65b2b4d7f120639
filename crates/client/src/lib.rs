//! SumLoop Client
//!
//! Synthetic load generator: fires randomised `SUM` requests at the dispatcher
//! and tallies how many were answered with a result.

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumloop_common::config::ClientConfig;
use sumloop_common::{exchange, ExchangeTimeouts, Result, SumLoopError};
use sumloop_proto::{ProtocolError, Response, SumRequest, WorkerStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of a load run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub sent: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Sends requests to one dispatcher
#[derive(Debug, Clone)]
pub struct LoadGenerator {
    config: ClientConfig,
    endpoint: String,
    timeouts: ExchangeTimeouts,
}

impl LoadGenerator {
    pub fn new(config: ClientConfig) -> Self {
        let endpoint = config.dispatcher_endpoint();
        let timeout = config.request_timeout();
        Self {
            config,
            endpoint,
            timeouts: ExchangeTimeouts::new(timeout, timeout),
        }
    }

    /// Random request with operands drawn from `0..max_operand`
    pub fn random_request(&self) -> SumRequest {
        let mut rng = rand::thread_rng();
        let operands: Vec<i64> = (0..self.config.operands_per_request)
            .map(|_| rng.gen_range(0..self.config.max_operand))
            .collect();
        SumRequest::new(&operands)
    }

    /// Send one request and parse the reply
    pub async fn send(&self, request: &SumRequest) -> Result<Response> {
        let reply = exchange(&self.endpoint, &request.to_string(), self.timeouts).await?;
        Ok(Response::parse(&reply)?)
    }

    /// Send `num_requests` requests, `interval` apart, with at most
    /// `max_in_flight` awaiting a reply at once.
    pub async fn run(&self, num_requests: usize, interval: Duration) -> LoadReport {
        info!(
            "Sending {} requests to {} (interval: {:?}, max in flight: {})",
            num_requests, self.endpoint, interval, self.config.max_in_flight
        );

        let in_flight = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut requests = JoinSet::new();
        let mut report = LoadReport::default();

        for seq in 0..num_requests {
            if seq > 0 && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }

            let Ok(permit) = Arc::clone(&in_flight).acquire_owned().await else {
                break;
            };
            let request = self.random_request();
            let generator = self.clone();
            report.sent += 1;

            requests.spawn(async move {
                let started = Instant::now();
                let outcome = generator.send(&request).await;
                drop(permit);

                match outcome {
                    Ok(response @ Response::Result(_)) => {
                        info!("#{} {} -> {} ({:?})", seq, request, response, started.elapsed());
                        true
                    }
                    Ok(response) => {
                        warn!("#{} {} -> {} ({:?})", seq, request, response, started.elapsed());
                        false
                    }
                    Err(e) => {
                        warn!("#{} {} failed: {}", seq, request, e);
                        false
                    }
                }
            });
        }

        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    warn!("Request task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Load run finished: {} sent, {} succeeded, {} failed",
            report.sent, report.succeeded, report.failed
        );
        report
    }

    /// Fetch the dispatcher's view of its workers
    pub async fn status(&self) -> Result<Vec<WorkerStatus>> {
        let reply = exchange(&self.endpoint, "STATUS", self.timeouts).await?;
        debug!("STATUS reply: {}", reply);

        match Response::parse(&reply)? {
            Response::Status(workers) => Ok(workers),
            Response::Error(message) => Err(SumLoopError::internal(format!(
                "dispatcher refused STATUS: {}",
                message
            ))),
            _ => Err(ProtocolError::UnrecognizedResponse(reply).into()),
        }
    }
}
