//! Configuration structures for SumLoop
//!
//! This module defines all configuration types used by the dispatcher, workers and the client.
//! Configurations are loaded from YAML files; binaries layer their command-line arguments on top.

use crate::error::{Result, SumLoopError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for SumLoop components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumLoopConfig {
    /// Mode: "dispatcher", "worker" or "client"
    pub mode: String,

    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Dispatcher-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher: Option<DispatcherConfig>,

    /// Worker-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfig>,

    /// Client-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    /// Connection listener tuning (defaults depend on mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener: Option<ListenerConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Dispatcher-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Health sweep interval in seconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Heartbeat age after which a worker is evicted
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,

    /// Timeout for connecting to a worker when forwarding
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for the worker's reply when forwarding
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_ms: u64,
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identifier, unique across the pool
    pub worker_id: u32,

    /// Dispatcher host name or address
    pub dispatcher_address: String,

    /// Dispatcher port
    pub dispatcher_port: u16,

    /// Heartbeat period in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Bound on a single heartbeat exchange
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Simulated processing time per request
    #[serde(default = "default_processing_delay")]
    pub processing_delay_ms: u64,
}

/// Load generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Dispatcher host name or address
    #[serde(default = "default_dispatcher_address")]
    pub dispatcher_address: String,

    /// Dispatcher port
    #[serde(default = "default_port")]
    pub dispatcher_port: u16,

    /// Number of requests to send
    #[serde(default = "default_num_requests")]
    pub num_requests: usize,

    /// Pause between two requests
    #[serde(default = "default_request_interval")]
    pub interval_ms: u64,

    /// Operands per SUM request
    #[serde(default = "default_operands_per_request")]
    pub operands_per_request: usize,

    /// Operands are drawn from `0..max_operand`
    #[serde(default = "default_max_operand")]
    pub max_operand: i64,

    /// Maximum requests awaiting a reply at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Bound on a single request/response exchange
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// What the listener does once every handler slot is busy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SaturationPolicy {
    /// Wait for a free slot
    Queue,

    /// Answer `ERROR:Server busy` and close
    Reject,
}

impl Default for SaturationPolicy {
    fn default() -> Self {
        SaturationPolicy::Queue
    }
}

/// Connection listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Size of the handler pool
    pub max_concurrent_connections: usize,

    /// Bound on reading the request line
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Behaviour when the pool is saturated
    #[serde(default)]
    pub saturation_policy: SaturationPolicy,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub structured_logging: bool,

    /// Dump gathered metrics to the log on shutdown
    #[serde(default = "default_log_metrics")]
    pub log_metrics_on_shutdown: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            structured_logging: false,
            log_metrics_on_shutdown: default_log_metrics(),
        }
    }
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_dispatcher_address() -> String {
    "localhost".to_string()
}

fn default_health_check_interval() -> u64 {
    10
}

fn default_staleness_threshold() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_forward_timeout() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    2000
}

fn default_processing_delay() -> u64 {
    100
}

fn default_num_requests() -> usize {
    20
}

fn default_request_interval() -> u64 {
    1000
}

fn default_operands_per_request() -> usize {
    5
}

fn default_max_operand() -> i64 {
    100
}

fn default_max_in_flight() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_read_timeout() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_metrics() -> bool {
    true
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            staleness_threshold_secs: default_staleness_threshold(),
            connect_timeout_ms: default_connect_timeout(),
            forward_timeout_ms: default_forward_timeout(),
        }
    }
}

impl DispatcherConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }
}

impl WorkerConfig {
    /// Create a worker config with default timings
    pub fn new(worker_id: u32, dispatcher_address: impl Into<String>, dispatcher_port: u16) -> Self {
        Self {
            worker_id,
            dispatcher_address: dispatcher_address.into(),
            dispatcher_port,
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            processing_delay_ms: default_processing_delay(),
        }
    }

    /// `host:port` of the dispatcher
    pub fn dispatcher_endpoint(&self) -> String {
        format!("{}:{}", self.dispatcher_address, self.dispatcher_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dispatcher_address: default_dispatcher_address(),
            dispatcher_port: default_port(),
            num_requests: default_num_requests(),
            interval_ms: default_request_interval(),
            operands_per_request: default_operands_per_request(),
            max_operand: default_max_operand(),
            max_in_flight: default_max_in_flight(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    /// `host:port` of the dispatcher
    pub fn dispatcher_endpoint(&self) -> String {
        format!("{}:{}", self.dispatcher_address, self.dispatcher_port)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ListenerConfig {
    /// Pool defaults for the dispatcher (20 handlers)
    pub fn for_dispatcher() -> Self {
        Self::with_pool_size(20)
    }

    /// Pool defaults for a worker (10 handlers)
    pub fn for_worker() -> Self {
        Self::with_pool_size(10)
    }

    pub fn with_pool_size(max_concurrent_connections: usize) -> Self {
        Self {
            max_concurrent_connections,
            read_timeout_ms: default_read_timeout(),
            saturation_policy: SaturationPolicy::default(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SumLoopConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SumLoopError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: SumLoopConfig = serde_yaml::from_str(&content).map_err(|e| {
            SumLoopError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Default dispatcher configuration listening on `port`
    pub fn dispatcher_defaults(port: u16) -> Self {
        Self {
            dispatcher: Some(DispatcherConfig::default()),
            ..Self::bare("dispatcher", port)
        }
    }

    /// Default worker configuration
    pub fn worker_defaults(worker: WorkerConfig, port: u16) -> Self {
        Self {
            worker: Some(worker),
            ..Self::bare("worker", port)
        }
    }

    /// Default client configuration
    pub fn client_defaults() -> Self {
        Self {
            client: Some(ClientConfig::default()),
            ..Self::bare("client", default_port())
        }
    }

    fn bare(mode: &str, port: u16) -> Self {
        Self {
            mode: mode.to_string(),
            bind_address: default_bind_address(),
            port,
            dispatcher: None,
            worker: None,
            client: None,
            listener: None,
            observability: ObservabilityConfig::default(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "dispatcher" => {
                let dispatcher = self.dispatcher_config()?;
                if dispatcher.health_check_interval_secs == 0 {
                    return Err(SumLoopError::config("health_check_interval_secs must be positive"));
                }
                if dispatcher.staleness_threshold_secs == 0 {
                    return Err(SumLoopError::config("staleness_threshold_secs must be positive"));
                }
            }
            "worker" => {
                let worker = self.worker_config()?;
                if worker.heartbeat_interval_secs == 0 {
                    return Err(SumLoopError::config("heartbeat_interval_secs must be positive"));
                }
                if worker.dispatcher_address.is_empty() {
                    return Err(SumLoopError::config("dispatcher_address must not be empty"));
                }
            }
            "client" => {
                let client = self.client_config()?;
                if client.operands_per_request == 0 || client.max_in_flight == 0 {
                    return Err(SumLoopError::config(
                        "operands_per_request and max_in_flight must be positive",
                    ));
                }
                if client.max_operand <= 0 {
                    return Err(SumLoopError::config("max_operand must be positive"));
                }
            }
            _ => {
                return Err(SumLoopError::config(format!("Invalid mode: {}", self.mode)));
            }
        }

        if let Some(listener) = &self.listener {
            if listener.max_concurrent_connections == 0 {
                return Err(SumLoopError::config("max_concurrent_connections must be positive"));
            }
        }

        Ok(())
    }

    pub fn dispatcher_config(&self) -> Result<&DispatcherConfig> {
        self.dispatcher
            .as_ref()
            .ok_or_else(|| SumLoopError::config("Dispatcher config required for dispatcher mode"))
    }

    pub fn worker_config(&self) -> Result<&WorkerConfig> {
        self.worker
            .as_ref()
            .ok_or_else(|| SumLoopError::config("Worker config required for worker mode"))
    }

    pub fn client_config(&self) -> Result<&ClientConfig> {
        self.client
            .as_ref()
            .ok_or_else(|| SumLoopError::config("Client config required for client mode"))
    }

    /// Listener settings, falling back to the defaults of the current mode
    pub fn listener_config(&self) -> ListenerConfig {
        match &self.listener {
            Some(listener) => listener.clone(),
            None if self.mode == "worker" => ListenerConfig::for_worker(),
            None => ListenerConfig::for_dispatcher(),
        }
    }

    /// `bind_address:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
