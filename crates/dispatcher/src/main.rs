//! SumLoop Dispatcher - Main Entry Point
//!
//! Usage:
//!   sumloop-dispatcher [PORT]
//!
//! Environment variables:
//!   SUMLOOP_CONFIG - YAML config file; command-line values override it
//!   RUST_LOG - log filter (default: info)

use anyhow::Context;
use clap::Parser;
use sumloop_common::telemetry::init_tracing;
use sumloop_common::{shutdown_on_ctrl_c, SumLoopConfig, METRICS};
use sumloop_dispatcher::Dispatcher;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sumloop-dispatcher")]
#[command(about = "SumLoop dispatcher: routes sum requests to the least-loaded worker")]
#[command(version)]
struct Args {
    /// Port to listen on (default: 8080)
    port: Option<u16>,

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
                .with_context(|| format!("loading dispatcher config from {}", path))?,
            None => SumLoopConfig::dispatcher_defaults(8080),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_tracing("sumloop_dispatcher=info,sumloop_common=info", &config.observability);

    info!("Starting SumLoop Dispatcher on {}", config.listen_address());

    let dispatcher = Dispatcher::bind(&config, METRICS.clone()).await?;
    dispatcher.run(shutdown_on_ctrl_c()).await?;

    if config.observability.log_metrics_on_shutdown {
        info!("Final metrics:\n{}", METRICS.gather());
    }

    info!("SumLoop Dispatcher shutdown complete");
    Ok(())
}
