//! SumLoop common library
//!
//! This crate contains shared code used across SumLoop components.

pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use config::SumLoopConfig;
pub use error::{ErrorKind, Result, SumLoopError};
pub use listener::{shutdown_on_ctrl_c, ConnectionListener, LineHandler};
pub use metrics::{MetricsRegistry, METRICS};
pub use transport::{exchange, ExchangeTimeouts};
