//! Scriptable in-memory backend for tests and benchmarks.
//!
//! [`MockFactory`] hands out [`MockConnection`]s and keeps a [`MockHandle`] to
//! each, so a test can break or kill a connection while the pool owns it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionId, ExecuteOutcome, PreparedStatement};
use crate::factory::ConnectionFactory;
use crate::value::{Row, Value};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct MockState {
    closed: AtomicBool,
    broken: AtomicBool,
    reset_fails: AtomicBool,
    prepares: AtomicUsize,
    rollbacks: AtomicUsize,
    native_closes: AtomicUsize,
}

impl MockState {
    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.broken.load(Ordering::Acquire)
    }
}

/// Test-side view of one mock connection.
#[derive(Debug, Clone)]
pub struct MockHandle {
    id: ConnectionId,
    state: Arc<MockState>,
}

impl MockHandle {
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Make the liveness probe fail while the handle still reports open.
    pub fn break_connection(&self) {
        self.state.broken.store(true, Ordering::Release);
    }

    /// Simulate the driver closing the connection underneath its owner.
    pub fn kill(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    /// Make the next return-path reset fail while probes keep passing.
    pub fn fail_reset(&self) {
        self.state.reset_fails.store(true, Ordering::Release);
    }

    pub fn rollback_count(&self) -> usize {
        self.state.rollbacks.load(Ordering::Acquire)
    }

    pub fn is_natively_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// How many times the owner called native `close`.
    pub fn native_close_count(&self) -> usize {
        self.state.native_closes.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct MockStatement {
    connection: ConnectionId,
    sql: String,
    generated_keys: bool,
    closed: AtomicBool,
    owner: Weak<MockState>,
}

impl PreparedStatement for MockStatement {
    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn returns_generated_keys(&self) -> bool {
        self.generated_keys
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_connection_open(&self) -> bool {
        self.owner
            .upgrade()
            .is_some_and(|state| !state.closed.load(Ordering::Acquire))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct MockConnection {
    id: ConnectionId,
    state: Arc<MockState>,
    auto_commit: bool,
    last_insert_id: i64,
}

impl MockConnection {
    fn with_id(id: ConnectionId) -> Self {
        Self {
            id,
            state: Arc::new(MockState::default()),
            auto_commit: true,
            last_insert_id: 0,
        }
    }

    /// A connection not tied to any factory.
    pub fn standalone() -> Self {
        Self::with_id(ConnectionId::next())
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            id: self.id,
            state: Arc::clone(&self.state),
        }
    }

    pub fn prepare_count(&self) -> usize {
        self.state.prepares.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state.is_alive() {
            Ok(())
        } else {
            Err(Error::backend(format!("mock connection {} is gone", self.id)))
        }
    }

    fn statement(&self, sql: &str, generated_keys: bool) -> Result<MockStatement> {
        self.ensure_alive()?;
        self.state.prepares.fetch_add(1, Ordering::AcqRel);
        Ok(MockStatement {
            connection: self.id,
            sql: sql.to_owned(),
            generated_keys,
            closed: AtomicBool::new(false),
            owner: Arc::downgrade(&self.state),
        })
    }

    fn check_statement(&self, statement: &MockStatement) -> Result<()> {
        self.ensure_alive()?;
        if statement.connection != self.id {
            return Err(Error::StatementMismatch {
                owner: statement.connection.get(),
                used_on: self.id.get(),
            });
        }
        if statement.is_closed() {
            return Err(Error::UseAfterClose);
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    type Statement = MockStatement;

    fn connection_id(&self) -> Result<ConnectionId> {
        Ok(self.id)
    }

    fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<usize> {
        self.ensure_alive()?;
        Ok(1)
    }

    fn execute_batch(&mut self, _sql: &str) -> Result<()> {
        self.ensure_alive()
    }

    fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_alive()?;
        Ok(vec![Row::new(vec![Value::Integer(1)])])
    }

    fn prepare(&mut self, sql: &str) -> Result<MockStatement> {
        self.statement(sql, false)
    }

    fn prepare_with_generated_keys(&mut self, sql: &str) -> Result<MockStatement> {
        self.statement(sql, true)
    }

    fn execute_prepared(
        &mut self,
        statement: &MockStatement,
        _params: &[Value],
    ) -> Result<ExecuteOutcome> {
        self.check_statement(statement)?;
        self.last_insert_id += 1;
        Ok(ExecuteOutcome {
            rows_affected: 1,
            generated_key: statement.generated_keys.then_some(self.last_insert_id),
        })
    }

    fn query_prepared(&mut self, statement: &MockStatement, _params: &[Value]) -> Result<Vec<Row>> {
        self.check_statement(statement)?;
        Ok(vec![Row::new(vec![Value::Text(statement.sql.clone())])])
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        self.ensure_alive()?;
        Ok(self.last_insert_id)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.ensure_alive()?;
        self.auto_commit = enabled;
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool> {
        self.ensure_alive()?;
        Ok(self.auto_commit)
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_alive()
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.state.rollbacks.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.ensure_alive()?;
        if self.state.reset_fails.load(Ordering::Acquire) {
            return Err(Error::backend("mock reset failure"));
        }
        if !self.auto_commit {
            self.state.rollbacks.fetch_add(1, Ordering::AcqRel);
            self.auto_commit = true;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn is_valid(&mut self, _timeout: Duration) -> bool {
        self.state.is_alive()
    }

    fn close(&mut self) -> Result<()> {
        self.state.native_closes.fetch_add(1, Ordering::AcqRel);
        self.state.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Factory producing [`MockConnection`]s.
#[derive(Debug)]
pub struct MockFactory {
    endpoint: String,
    handles: Mutex<Vec<MockHandle>>,
    failing_connects: AtomicUsize,
}

impl MockFactory {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            handles: Mutex::new(Vec::new()),
            failing_connects: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::Release);
    }

    /// Handles of every connection created so far, oldest first.
    pub fn handles(&self) -> Vec<MockHandle> {
        self.handles.lock().clone()
    }

    pub fn handle(&self, id: ConnectionId) -> Option<MockHandle> {
        self.handles.lock().iter().find(|h| h.id == id).cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self, id: ConnectionId) -> Result<MockConnection> {
        let should_fail = self
            .failing_connects
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::backend(format!(
                "mock endpoint {} refused connection",
                self.endpoint
            )));
        }

        let conn = MockConnection::with_id(id);
        self.handles.lock().push(conn.handle());
        Ok(conn)
    }
}
