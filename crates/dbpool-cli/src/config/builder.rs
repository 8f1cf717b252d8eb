//! Configuration builder

use std::time::Duration;

use dbpool::PoolConfig;

use crate::Error;

/// Soak tool configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint key handed to the pool registry.
    pub database: String,
    pub pool: PoolConfig,
    pub workload: WorkloadConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub const fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Shape of the concurrent workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadConfig {
    pub workers: usize,
    /// Checkouts performed by each worker.
    pub iterations: usize,
}

impl WorkloadConfig {
    pub const DEFAULT_WORKERS: usize = 8;
    pub const DEFAULT_ITERATIONS: usize = 100;
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workers: Self::DEFAULT_WORKERS,
            iterations: Self::DEFAULT_ITERATIONS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_logs: bool,
}

/// Configuration builder with fluent API
///
/// Every field is optional so that layers applied later only override what
/// they actually set.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    database: Option<String>,
    max_size: Option<usize>,
    prewarm: Option<usize>,
    max_wait: Option<Duration>,
    validation_timeout: Option<Duration>,
    statement_cache: Option<usize>,
    workers: Option<usize>,
    iterations: Option<usize>,
    log_level: Option<String>,
    json_logs: Option<bool>,
}

impl ConfigBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            database: None,
            max_size: None,
            prewarm: None,
            max_wait: None,
            validation_timeout: None,
            statement_cache: None,
            workers: None,
            iterations: None,
            log_level: None,
            json_logs: None,
        }
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub const fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    #[must_use]
    pub const fn prewarm(mut self, prewarm: usize) -> Self {
        self.prewarm = Some(prewarm);
        self
    }

    #[must_use]
    pub const fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    #[must_use]
    pub const fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn statement_cache(mut self, capacity: usize) -> Self {
        self.statement_cache = Some(capacity);
        self
    }

    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub const fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = Some(iterations);
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = Some(enabled);
        self
    }

    /// Build configuration
    pub fn build(self) -> crate::Result<Config> {
        let database = self
            .database
            .filter(|db| !db.trim().is_empty())
            .ok_or_else(|| Error::Config("database endpoint is required".into()))?;

        let mut pool = PoolConfig::default();
        if let Some(max_size) = self.max_size {
            pool = pool.with_max_size(max_size);
        }
        if let Some(prewarm) = self.prewarm {
            pool = pool.with_prewarm(prewarm);
        }
        if let Some(max_wait) = self.max_wait {
            pool = pool.with_max_wait(max_wait);
        }
        if let Some(timeout) = self.validation_timeout {
            pool = pool.with_validation_timeout(timeout);
        }
        if let Some(capacity) = self.statement_cache {
            pool = pool.with_statement_cache_capacity(capacity);
        }
        pool.validate()
            .map_err(|e| Error::Config(format!("invalid pool settings: {e}")))?;

        let workload = WorkloadConfig {
            workers: self.workers.unwrap_or(WorkloadConfig::DEFAULT_WORKERS),
            iterations: self.iterations.unwrap_or(WorkloadConfig::DEFAULT_ITERATIONS),
        };
        if workload.workers == 0 {
            return Err(Error::Config("workers must be > 0".into()));
        }

        let log_level = self
            .log_level
            .filter(|level| !level.is_empty())
            .unwrap_or_else(|| "info".to_string());

        Ok(Config {
            database,
            pool,
            workload,
            telemetry: TelemetryConfig {
                log_level,
                json_logs: self.json_logs.unwrap_or(false),
            },
        })
    }
}
