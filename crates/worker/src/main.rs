//! SumLoop Worker - Main Entry Point
//!
//! Usage:
//!   sumloop-worker <WORKER_ID> <PORT> <DISPATCHER_ADDRESS> <DISPATCHER_PORT>
//!
//! Environment variables:
//!   SUMLOOP_CONFIG - YAML config file; positional arguments override its values
//!   RUST_LOG - log filter (default: info)

use anyhow::{bail, Context};
use clap::Parser;
use sumloop_common::config::WorkerConfig;
use sumloop_common::telemetry::init_tracing;
use sumloop_common::{shutdown_on_ctrl_c, SumLoopConfig, METRICS};
use sumloop_worker::Worker;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sumloop-worker")]
#[command(about = "SumLoop worker: computes sums and reports its load to the dispatcher")]
#[command(version)]
struct Args {
    /// Unique worker id
    worker_id: Option<u32>,

    /// Port to listen on for forwarded requests
    port: Option<u16>,

    /// Dispatcher host name or IP
    dispatcher_address: Option<String>,

    /// Dispatcher port
    dispatcher_port: Option<u16>,

    /// Address to bind the listener to
    #[arg(long)]
    bind: Option<String>,

    /// YAML configuration file
    #[arg(long, env = "SUMLOOP_CONFIG")]
    config: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<SumLoopConfig> {
        let mut config = match &self.config {
            Some(path) => SumLoopConfig::from_file(path)
                .with_context(|| format!("loading worker config from {}", path))?,
            None => match (self.worker_id, self.port, &self.dispatcher_address, self.dispatcher_port) {
                (Some(id), Some(port), Some(address), Some(dispatcher_port)) => {
                    SumLoopConfig::worker_defaults(
                        WorkerConfig::new(id, address.clone(), dispatcher_port),
                        port,
                    )
                }
                _ => bail!(
                    "usage: sumloop-worker <WORKER_ID> <PORT> <DISPATCHER_ADDRESS> <DISPATCHER_PORT>"
                ),
            },
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(worker) = config.worker.as_mut() {
            if let Some(id) = self.worker_id {
                worker.worker_id = id;
            }
            if let Some(address) = self.dispatcher_address {
                worker.dispatcher_address = address;
            }
            if let Some(port) = self.dispatcher_port {
                worker.dispatcher_port = port;
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_tracing("sumloop_worker=info,sumloop_common=info", &config.observability);

    let worker_config = config.worker_config()?;
    info!(
        "Starting SumLoop Worker {} on {} (dispatcher: {})",
        worker_config.worker_id,
        config.listen_address(),
        worker_config.dispatcher_endpoint()
    );

    let worker = Worker::bind(&config, METRICS.clone()).await?;
    worker.run(shutdown_on_ctrl_c()).await?;

    if config.observability.log_metrics_on_shutdown {
        info!("Final metrics:\n{}", METRICS.gather());
    }

    info!("SumLoop Worker shutdown complete");
    Ok(())
}
