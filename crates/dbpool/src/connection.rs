//! Connection capability traits.
//!
//! [`Connection`] is the whole surface a caller can use. Raw driver connections
//! implement it directly and [`PooledConnection`](crate::PooledConnection)
//! implements it by forwarding through a single closed-flag gate, so the two are
//! interchangeable from the caller's point of view.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::Result;
use crate::value::{Row, Value};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one raw connection.
///
/// Identities are never reused, so a destroyed connection can never be
/// confused with its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh identity.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of executing a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExecuteOutcome {
    pub rows_affected: usize,
    /// Key generated by the statement; only set for statements prepared with
    /// [`Connection::prepare_with_generated_keys`].
    pub generated_key: Option<i64>,
}

/// A precompiled, parameterized query scoped to one connection.
pub trait PreparedStatement: Send + Sync + 'static {
    /// Connection that compiled this statement.
    fn connection_id(&self) -> ConnectionId;

    fn sql(&self) -> &str;

    /// Whether executions report the generated key.
    fn returns_generated_keys(&self) -> bool;

    /// Whether this statement's own handle has been closed.
    fn is_closed(&self) -> bool;

    /// Whether the connection that compiled this statement is still open.
    fn is_connection_open(&self) -> bool;

    /// Close the handle. Idempotent.
    fn close(&self);

    /// Usable means open and owned by an open connection.
    fn is_usable(&self) -> bool {
        !self.is_closed() && self.is_connection_open()
    }
}

/// Full connection capability set.
pub trait Connection {
    type Statement: PreparedStatement;

    fn connection_id(&self) -> Result<ConnectionId>;

    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Execute several `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement>;

    /// Prepare a statement whose executions report the generated key.
    fn prepare_with_generated_keys(&mut self, sql: &str) -> Result<Self::Statement>;

    fn execute_prepared(
        &mut self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<ExecuteOutcome>;

    fn query_prepared(&mut self, statement: &Self::Statement, params: &[Value])
    -> Result<Vec<Row>>;

    /// Key generated by the most recent insert on this connection.
    fn last_insert_id(&mut self) -> Result<i64>;

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    fn auto_commit(&self) -> Result<bool>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether the connection can no longer be used.
    fn is_closed(&self) -> bool;

    /// Liveness probe. Never fails, only reports.
    fn is_valid(&mut self, timeout: Duration) -> bool;

    /// Release the connection. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Drop session state left behind by a checkout: roll back uncommitted
    /// work and restore auto-commit.
    fn reset(&mut self) -> Result<()> {
        if !self.auto_commit()? {
            self.rollback()?;
            self.set_auto_commit(true)?;
        }
        Ok(())
    }

    /// First row of a query, if any.
    fn query_row(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}
