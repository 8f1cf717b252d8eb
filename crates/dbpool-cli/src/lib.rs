//! Soak and diagnostics tool for `dbpool` over SQLite.
//!
//! Loads layered configuration, opens a pool through a
//! [`PoolRegistry`](dbpool::PoolRegistry), runs a concurrent insert/read-back
//! workload and reports pool and statement cache statistics.

pub mod config;
mod error;
pub mod observability;
pub mod workload;

pub use config::{Config, ConfigBuilder, TelemetryConfig, WorkloadConfig};
pub use error::{Error, Result};
pub use workload::WorkloadReport;
