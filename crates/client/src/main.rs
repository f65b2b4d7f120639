//! SumLoop Client - Main Entry Point
//!
//! Usage:
//!   sumloop-client [DISPATCHER_ADDRESS] [DISPATCHER_PORT] [--requests N] [--interval-ms MS]
//!   sumloop-client --status
//!
//! Environment variables:
//!   SUMLOOP_CONFIG - YAML config file; command-line values override it
//!   RUST_LOG - log filter (default: info)

use anyhow::Context;
use clap::Parser;
use sumloop_client::LoadGenerator;
use sumloop_common::telemetry::init_tracing;
use sumloop_common::SumLoopConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sumloop-client")]
#[command(about = "SumLoop load generator")]
#[command(version)]
struct Args {
    /// Dispatcher host name or IP (default: localhost)
    dispatcher_address: Option<String>,

    /// Dispatcher port (default: 8080)
    dispatcher_port: Option<u16>,

    /// Number of requests to send
    #[arg(long)]
    requests: Option<usize>,

    /// Pause between requests in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Print the dispatcher's worker registry instead of sending load
    #[arg(long)]
    status: bool,

    /// YAML configuration file
    #[arg(long, env = "SUMLOOP_CONFIG")]
    config: Option<String>,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<SumLoopConfig> {
        let mut config = match &self.config {
            Some(path) => SumLoopConfig::from_file(path)
                .with_context(|| format!("loading client config from {}", path))?,
            None => SumLoopConfig::client_defaults(),
        };

        if let Some(client) = config.client.as_mut() {
            if let Some(address) = &self.dispatcher_address {
                client.dispatcher_address = address.clone();
            }
            if let Some(port) = self.dispatcher_port {
                client.dispatcher_port = port;
            }
            if let Some(requests) = self.requests {
                client.num_requests = requests;
            }
            if let Some(interval_ms) = self.interval_ms {
                client.interval_ms = interval_ms;
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.to_config()?;
    init_tracing("sumloop_client=info,sumloop_common=info", &config.observability);

    let client_config = config.client_config()?.clone();
    let generator = LoadGenerator::new(client_config.clone());

    if args.status {
        let workers = generator.status().await?;
        println!("{}", serde_json::to_string_pretty(&workers)?);
        return Ok(());
    }

    info!("Starting SumLoop Client against {}", client_config.dispatcher_endpoint());
    let report = generator
        .run(client_config.num_requests, client_config.interval())
        .await;

    if report.failed > 0 {
        info!("{} of {} requests failed", report.failed, report.sent);
    }
    Ok(())
}
