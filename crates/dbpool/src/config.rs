//! Pool configuration.

use std::time::Duration;

use crate::{Error, Result};

/// Default cap on simultaneously existing raw connections.
pub const DEFAULT_MAX_SIZE: usize = 10;
/// Default number of connections opened when the pool is built.
pub const DEFAULT_PREWARM: usize = 3;
/// Default bound on how long `acquire` blocks at capacity.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);
/// Default budget for one liveness probe.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(1);
/// Default number of statements kept by the shared statement cache.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 250;

/// Pool configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of raw connections in existence at once.
    pub max_size: usize,
    /// Connections created eagerly at construction; capped at `max_size`.
    pub prewarm: usize,
    /// How long `acquire` may block when the pool is at capacity.
    pub max_wait: Duration,
    /// Budget handed to the liveness probe on checkout and return.
    pub validation_timeout: Duration,
    /// Statement cache capacity. Zero disables caching.
    pub statement_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            prewarm: DEFAULT_PREWARM,
            max_wait: DEFAULT_MAX_WAIT,
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub const fn with_prewarm(mut self, prewarm: usize) -> Self {
        self.prewarm = prewarm;
        self
    }

    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub const fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Check the parameters for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("max_size must be > 0".into()));
        }
        Ok(())
    }

    /// Number of connections actually opened at construction.
    #[must_use]
    pub fn effective_prewarm(&self) -> usize {
        self.prewarm.min(self.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.prewarm, 3);
        assert_eq!(config.max_wait, Duration::from_secs(30));
        assert_eq!(config.validation_timeout, Duration::from_secs(1));
        assert_eq!(config.statement_cache_capacity, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new()
            .with_max_size(3)
            .with_prewarm(0)
            .with_max_wait(Duration::from_millis(150))
            .with_validation_timeout(Duration::from_millis(20))
            .with_statement_cache_capacity(0);

        assert_eq!(config.max_size, 3);
        assert_eq!(config.prewarm, 0);
        assert_eq!(config.max_wait, Duration::from_millis(150));
        assert_eq!(config.validation_timeout, Duration::from_millis(20));
        assert_eq!(config.statement_cache_capacity, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_size_rejected() {
        let err = PoolConfig::new()
            .with_max_size(0)
            .with_prewarm(0)
            .validate()
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_prewarm_is_capped_by_max_size() {
        let config = PoolConfig::new().with_max_size(2).with_prewarm(5);
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_prewarm(), 2);

        let config = PoolConfig::new().with_max_size(8);
        assert_eq!(config.effective_prewarm(), 3);
    }
}
