//! TOML configuration file loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::builder::ConfigBuilder;
use crate::Result;

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./dbpool.toml",
    "~/.config/dbpool/config.toml",
    "/etc/dbpool/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS.iter().find_map(|path_str| {
        let path = if path_str.starts_with('~') {
            let home = std::env::var("HOME").ok()?;
            PathBuf::from(path_str.replacen('~', &home, 1))
        } else {
            PathBuf::from(path_str)
        };
        path.exists().then_some(path)
    })
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(apply_file_config(builder, file_config))
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> ConfigBuilder {
    if let Some(endpoint) = config.database.and_then(|db| db.endpoint) {
        builder = builder.database(endpoint);
    }

    if let Some(pool) = config.pool {
        if let Some(size) = pool.max_size {
            builder = builder.max_size(size);
        }
        if let Some(prewarm) = pool.prewarm {
            builder = builder.prewarm(prewarm);
        }
        if let Some(ms) = pool.max_wait_ms {
            builder = builder.max_wait(Duration::from_millis(ms));
        }
        if let Some(ms) = pool.validation_timeout_ms {
            builder = builder.validation_timeout(Duration::from_millis(ms));
        }
        if let Some(capacity) = pool.statement_cache {
            builder = builder.statement_cache(capacity);
        }
    }

    if let Some(workload) = config.workload {
        if let Some(workers) = workload.workers {
            builder = builder.workers(workers);
        }
        if let Some(iterations) = workload.iterations {
            builder = builder.iterations(iterations);
        }
    }

    if let Some(obs) = config.observability {
        if let Some(level) = obs.log_level {
            builder = builder.log_level(level);
        }
        if let Some(json) = obs.json_logs {
            builder = builder.json_logs(json);
        }
    }

    builder
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database: Option<DatabaseConfig>,
    pool: Option<PoolFileConfig>,
    workload: Option<WorkloadFileConfig>,
    observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Deserialize)]
struct DatabaseConfig {
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PoolFileConfig {
    max_size: Option<usize>,
    prewarm: Option<usize>,
    max_wait_ms: Option<u64>,
    validation_timeout_ms: Option<u64>,
    statement_cache: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WorkloadFileConfig {
    workers: Option<usize>,
    iterations: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: Option<String>,
    json_logs: Option<bool>,
}
