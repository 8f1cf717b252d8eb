//! Endpoint-keyed pool registry.
//!
//! The registry is an ordinary value: construct it once at startup and pass it
//! to whatever needs pools. Every lookup of the same key yields the same pool.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::Result;
use crate::config::PoolConfig;
use crate::factory::ConnectionFactory;
use crate::pool::Pool;

type BuildFn<F> = dyn Fn(&str) -> Result<Pool<F>> + Send + Sync;

pub struct PoolRegistry<F: ConnectionFactory> {
    build: Box<BuildFn<F>>,
    pools: Mutex<HashMap<String, Pool<F>>>,
}

impl<F: ConnectionFactory> fmt::Debug for PoolRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("endpoints", &self.keys())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    /// Registry whose pools are built by `build` on first lookup of a key.
    pub fn new(build: impl Fn(&str) -> Result<Pool<F>> + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Registry that builds every pool with `config` from a factory made by `connect`.
    pub fn with_config(
        config: PoolConfig,
        connect: impl Fn(&str) -> Result<F> + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |key| Pool::new(connect(key)?, config.clone()))
    }

    /// Pool for `key`, created on first request.
    ///
    /// Creation happens under the registry lock, so concurrent first lookups
    /// of one key still produce a single pool.
    pub fn pool(&self, key: &str) -> Result<Pool<F>> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(key) {
            return Ok(pool.clone());
        }
        let pool = (self.build)(key)?;
        pools.insert(key.to_owned(), pool.clone());
        tracing::debug!(pool.endpoint = key, "registered pool");
        Ok(pool)
    }

    /// Pool for `key` if one was already created.
    pub fn get(&self, key: &str) -> Option<Pool<F>> {
        self.pools.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    /// Registered endpoint keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pools.lock().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Shut down and forget the pool for `key`. Returns whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.pools.lock().remove(key);
        removed.is_some_and(|pool| {
            pool.shutdown();
            true
        })
    }

    /// Shut down every registered pool and empty the registry.
    pub fn shutdown_all(&self) {
        let pools: Vec<Pool<F>> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        for pool in &pools {
            pool.shutdown();
        }
        tracing::info!(pools = pools.len(), "all connection pools shut down");
    }
}
