//! Bounded, thread-blocking database connection pool.
//!
//! A [`Pool`] hands out [`PooledConnection`] proxies that behave like raw
//! connections except that closing one returns the underlying connection to the
//! pool. Prepared statements can be shared across checkouts through the pool's
//! [`StatementCache`], and a [`PoolRegistry`] maps endpoint keys to pools.
//!
//! # Features
//!
//! - Hard cap on live connections, enforced even while connections are being created
//! - Bounded waits with [`Error::ResourceExhausted`] and cooperative [`Interrupt`]ion
//! - Liveness probe on every checkout and return; broken connections are replaced
//! - Idempotent close and shutdown
//! - Backend-neutral: drivers plug in through [`ConnectionFactory`] and [`Connection`]
//!
//! # Example
//!
//! ```rust,ignore
//! use dbpool::{Connection, Pool, PoolConfig};
//!
//! let pool = Pool::new(factory, PoolConfig::new().with_max_size(20).with_prewarm(5))?;
//! let mut conn = pool.acquire()?;
//! let insert = conn.prepare_cached_with_generated_keys("INSERT INTO t (v) VALUES (?)")?;
//! let outcome = conn.execute_prepared(&insert, &["hello".into()])?;
//! conn.close()?; // back to the pool
//! ```

pub mod config;
pub mod connection;
mod error;
pub mod factory;
mod pool;
mod proxy;
pub mod registry;
mod slot;
pub mod statement_cache;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod value;

// Re-export main types for convenience
pub use config::PoolConfig;
pub use connection::{Connection, ConnectionId, ExecuteOutcome, PreparedStatement};
pub use error::{BoxError, Error, Result};
pub use factory::{ConnectionFactory, NoSetup, SessionSetup};
pub use pool::{Interrupt, Pool, StatementOf};
pub use proxy::PooledConnection;
pub use registry::PoolRegistry;
pub use statement_cache::{CacheStatistics, StatementCache, StatementKey};
pub use stats::PoolStats;
pub use value::{Row, Value};
