//! SQLite backend for [`dbpool`].
//!
//! Provides the raw [`SqliteConnection`], its [`SqliteStatement`] handle, a
//! [`SqliteFactory`] keyed by endpoint, and the [`SessionTuning`] hook applied
//! to every fresh connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use dbpool::{Connection, PoolConfig};
//!
//! let pool = dbpool_sqlite::open_pool("sqlite:///var/lib/app/app.db", PoolConfig::default())?;
//! let mut conn = pool.acquire()?;
//! conn.execute("UPDATE devices SET status = ? WHERE id = ?", &["retired".into(), 42.into()])?;
//! ```

pub mod connection;
pub mod endpoint;
pub mod factory;

pub use connection::{SqliteConnection, SqliteStatement};
pub use endpoint::SqliteEndpoint;
pub use factory::{
    DEFAULT_BUSY_TIMEOUT, DEFAULT_DRIVER_STATEMENT_CACHE, SessionTuning, SqliteFactory,
    open_pool, open_pool_with, registry,
};
