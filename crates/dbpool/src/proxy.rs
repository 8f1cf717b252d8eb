//! Checked-out connection handle.

// Intentionally omits connection details from Debug output.
#![allow(clippy::missing_fields_in_debug)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, ConnectionId, ExecuteOutcome};
use crate::factory::ConnectionFactory;
use crate::pool::{Shared, StatementOf};
use crate::slot::Slot;
use crate::value::{Row, Value};
use crate::{Error, Result};

/// A connection borrowed from a [`Pool`](crate::Pool).
///
/// Implements [`Connection`] by forwarding to the raw connection. Closing it
/// returns the raw connection to the pool instead of closing it; every later
/// call fails with [`Error::UseAfterClose`]. Dropping an open handle closes it.
pub struct PooledConnection<F: ConnectionFactory> {
    // None = closed, raw connection already returned.
    slot: Option<Slot<F::Connection>>,
    pool: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    pub(crate) const fn new(slot: Slot<F::Connection>, pool: Arc<Shared<F>>) -> Self {
        Self {
            slot: Some(slot),
            pool,
        }
    }

    fn forward<T>(&mut self, op: impl FnOnce(&mut F::Connection) -> Result<T>) -> Result<T> {
        match self.slot.as_mut() {
            Some(slot) => op(&mut slot.conn),
            None => Err(Error::UseAfterClose),
        }
    }

    fn forward_ref<T>(&self, op: impl FnOnce(&F::Connection) -> Result<T>) -> Result<T> {
        match self.slot.as_ref() {
            Some(slot) => op(&slot.conn),
            None => Err(Error::UseAfterClose),
        }
    }

    /// Prepare `sql` through the pool's statement cache.
    ///
    /// Repeated calls on the same raw connection return the same statement
    /// while it stays usable.
    pub fn prepare_cached(&mut self, sql: &str) -> Result<Arc<StatementOf<F>>> {
        let pool = Arc::clone(&self.pool);
        pool.statements.get(self, sql, false)
    }

    /// Like [`PooledConnection::prepare_cached`] for statements that report
    /// the generated key.
    pub fn prepare_cached_with_generated_keys(
        &mut self,
        sql: &str,
    ) -> Result<Arc<StatementOf<F>>> {
        let pool = Arc::clone(&self.pool);
        pool.statements.get(self, sql, true)
    }

    /// Borrow the raw connection for driver-specific calls.
    ///
    /// Closing the raw connection through this reference makes the pool
    /// discard it on return.
    pub fn raw(&mut self) -> Result<&mut F::Connection> {
        self.slot
            .as_mut()
            .map(|slot| &mut slot.conn)
            .ok_or(Error::UseAfterClose)
    }

    pub fn endpoint(&self) -> &str {
        self.pool.endpoint()
    }
}

impl<F: ConnectionFactory> Connection for PooledConnection<F> {
    type Statement = StatementOf<F>;

    fn connection_id(&self) -> Result<ConnectionId> {
        self.forward_ref(Connection::connection_id)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        self.forward(|conn| conn.execute(sql, params))
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.forward(|conn| conn.execute_batch(sql))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.forward(|conn| conn.query(sql, params))
    }

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement> {
        self.forward(|conn| conn.prepare(sql))
    }

    fn prepare_with_generated_keys(&mut self, sql: &str) -> Result<Self::Statement> {
        self.forward(|conn| conn.prepare_with_generated_keys(sql))
    }

    fn execute_prepared(
        &mut self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<ExecuteOutcome> {
        self.forward(|conn| conn.execute_prepared(statement, params))
    }

    fn query_prepared(&mut self, statement: &Self::Statement, params: &[Value]) -> Result<Vec<Row>> {
        self.forward(|conn| conn.query_prepared(statement, params))
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        self.forward(Connection::last_insert_id)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.forward(|conn| conn.set_auto_commit(enabled))
    }

    fn auto_commit(&self) -> Result<bool> {
        self.forward_ref(Connection::auto_commit)
    }

    fn commit(&mut self) -> Result<()> {
        self.forward(Connection::commit)
    }

    fn rollback(&mut self) -> Result<()> {
        self.forward(Connection::rollback)
    }

    fn reset(&mut self) -> Result<()> {
        self.forward(Connection::reset)
    }

    fn is_closed(&self) -> bool {
        self.slot.as_ref().is_none_or(|slot| slot.conn.is_closed())
    }

    fn is_valid(&mut self, timeout: Duration) -> bool {
        self.slot
            .as_mut()
            .is_some_and(|slot| slot.conn.is_valid(timeout))
    }

    /// Return the raw connection to the pool. Idempotent.
    fn close(&mut self) -> Result<()> {
        if let Some(slot) = self.slot.take() {
            self.pool.check_in(slot);
        }
        Ok(())
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.check_in(slot);
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.endpoint())
            .field("connection", &self.slot.as_ref().map(|slot| slot.id))
            .finish()
    }
}
