//! Connection factory and session tuning for SQLite endpoints.

use std::time::Duration;

use dbpool::{
    ConnectionFactory, ConnectionId, Error, Pool, PoolConfig, PoolRegistry, Result, SessionSetup,
};
use rusqlite::OpenFlags;

use crate::connection::SqliteConnection;
use crate::endpoint::SqliteEndpoint;

/// Default capacity of rusqlite's per-connection compiled statement cache.
pub const DEFAULT_DRIVER_STATEMENT_CACHE: usize = 64;

/// Default `busy_timeout` applied by [`SessionTuning`].
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens [`SqliteConnection`]s to one endpoint.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    key: String,
    endpoint: SqliteEndpoint,
    flags: OpenFlags,
    driver_statement_cache: usize,
}

impl SqliteFactory {
    pub fn new(key: &str) -> Result<Self> {
        Ok(Self {
            key: key.to_owned(),
            endpoint: SqliteEndpoint::parse(key)?,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            driver_statement_cache: DEFAULT_DRIVER_STATEMENT_CACHE,
        })
    }

    #[must_use]
    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_driver_statement_cache(mut self, capacity: usize) -> Self {
        self.driver_statement_cache = capacity;
        self
    }

    pub const fn sqlite_endpoint(&self) -> &SqliteEndpoint {
        &self.endpoint
    }
}

impl ConnectionFactory for SqliteFactory {
    type Connection = SqliteConnection;

    fn endpoint(&self) -> &str {
        &self.key
    }

    fn connect(&self, id: ConnectionId) -> Result<SqliteConnection> {
        let target = self.endpoint.open_target();
        let conn = rusqlite::Connection::open_with_flags(&target, self.flags).map_err(|e| {
            tracing::warn!(endpoint = %self.endpoint, error = %e, "failed to open SQLite database");
            Error::backend(e)
        })?;
        conn.set_prepared_statement_cache_capacity(self.driver_statement_cache);
        Ok(SqliteConnection::new(id, conn, self.endpoint.is_memory()))
    }
}

/// Session settings applied to every new connection.
///
/// WAL journaling is only requested for on-disk databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTuning {
    pub foreign_keys: bool,
    pub wal: bool,
    /// Value for `PRAGMA synchronous`.
    pub synchronous: String,
    pub busy_timeout: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            foreign_keys: true,
            wal: true,
            synchronous: "NORMAL".to_owned(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl SessionTuning {
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }
}

impl SessionSetup<SqliteConnection> for SessionTuning {
    fn on_connect(&self, conn: &mut SqliteConnection) -> Result<()> {
        let use_wal = self.wal && !conn.is_in_memory();
        let handle = conn.handle()?;

        handle.busy_timeout(self.busy_timeout).map_err(Error::backend)?;
        handle
            .pragma_update(None, "foreign_keys", if self.foreign_keys { "ON" } else { "OFF" })
            .map_err(Error::backend)?;
        if use_wal {
            let mode: String = handle
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(Error::backend)?;
            if !mode.eq_ignore_ascii_case("wal") {
                tracing::debug!(journal_mode = %mode, "database refused WAL journaling");
            }
        }
        handle
            .pragma_update(None, "synchronous", &self.synchronous)
            .map_err(Error::backend)?;
        Ok(())
    }
}

/// Build a tuned pool for one endpoint key.
pub fn open_pool(key: &str, config: PoolConfig) -> Result<Pool<SqliteFactory>> {
    open_pool_with(key, config, SessionTuning::default())
}

pub fn open_pool_with(
    key: &str,
    config: PoolConfig,
    tuning: SessionTuning,
) -> Result<Pool<SqliteFactory>> {
    let factory = SqliteFactory::new(key)?
        .with_driver_statement_cache(config.statement_cache_capacity.max(1));
    Pool::with_setup(factory, config, tuning)
}

/// Registry building tuned SQLite pools on first lookup of each key.
pub fn registry(config: PoolConfig) -> PoolRegistry<SqliteFactory> {
    PoolRegistry::new(move |key| open_pool(key, config.clone()))
}
