//! Environment variable loading for configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::builder::ConfigBuilder;
use crate::Result;

/// Environment variable names
mod vars {
    pub const DATABASE: &str = "DBPOOL_DATABASE";
    pub const MAX_SIZE: &str = "DBPOOL_MAX_SIZE";
    pub const PREWARM: &str = "DBPOOL_PREWARM";
    pub const MAX_WAIT_MS: &str = "DBPOOL_MAX_WAIT_MS";
    pub const VALIDATION_TIMEOUT_MS: &str = "DBPOOL_VALIDATION_TIMEOUT_MS";
    pub const STATEMENT_CACHE: &str = "DBPOOL_STATEMENT_CACHE";
    pub const WORKERS: &str = "DBPOOL_WORKERS";
    pub const ITERATIONS: &str = "DBPOOL_ITERATIONS";
    pub const LOG_LEVEL: &str = "DBPOOL_LOG_LEVEL";
    pub const JSON_LOGS: &str = "DBPOOL_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    if let Ok(database) = env::var(vars::DATABASE) {
        builder = builder.database(database);
    }

    // Pool
    if let Some(size) = parse_var(vars::MAX_SIZE)? {
        builder = builder.max_size(size);
    }
    if let Some(prewarm) = parse_var(vars::PREWARM)? {
        builder = builder.prewarm(prewarm);
    }
    if let Some(ms) = parse_var(vars::MAX_WAIT_MS)? {
        builder = builder.max_wait(Duration::from_millis(ms));
    }
    if let Some(ms) = parse_var(vars::VALIDATION_TIMEOUT_MS)? {
        builder = builder.validation_timeout(Duration::from_millis(ms));
    }
    if let Some(capacity) = parse_var(vars::STATEMENT_CACHE)? {
        builder = builder.statement_cache(capacity);
    }

    // Workload
    if let Some(workers) = parse_var(vars::WORKERS)? {
        builder = builder.workers(workers);
    }
    if let Some(iterations) = parse_var(vars::ITERATIONS)? {
        builder = builder.iterations(iterations);
    }

    // Logging
    if let Ok(level) = env::var(vars::LOG_LEVEL) {
        builder = builder.log_level(level);
    }
    if let Ok(val) = env::var(vars::JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("Invalid {name} '{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
