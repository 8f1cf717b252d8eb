//! SQLite raw connection and prepared statement handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dbpool::{
    Connection, ConnectionId, Error, ExecuteOutcome, PreparedStatement, Result, Row, Value,
};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ToSql, params_from_iter};

/// Borrowing adapter from [`Value`] to rusqlite parameters.
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self.0 {
            Value::Null => ValueRef::Null,
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::Real(v) => ValueRef::Real(*v),
            Value::Text(v) => ValueRef::Text(v.as_bytes()),
            Value::Blob(v) => ValueRef::Blob(v),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

fn params(values: &[Value]) -> impl rusqlite::Params + '_ {
    params_from_iter(values.iter().map(Param))
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        // SQLite does not enforce UTF-8; keep undecodable text byte-exact.
        ValueRef::Text(v) => std::str::from_utf8(v)
            .map_or_else(|_| Value::Blob(v.to_vec()), |text| Value::Text(text.to_owned())),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}

fn collect_rows(mut rows: rusqlite::Rows<'_>, columns: usize) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(Error::backend)? {
        let values = (0..columns)
            .map(|i| row.get_ref(i).map(from_sql))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::backend)?;
        out.push(Row::new(values));
    }
    Ok(out)
}

/// Compiled query scoped to one [`SqliteConnection`].
///
/// The compiled form lives in the connection's own statement cache; this
/// handle carries identity and validity. Execute it through the connection
/// that prepared it.
#[derive(Debug)]
pub struct SqliteStatement {
    connection: ConnectionId,
    sql: String,
    generated_keys: bool,
    parameter_count: usize,
    closed: AtomicBool,
    connection_open: Arc<AtomicBool>,
}

impl SqliteStatement {
    pub const fn parameter_count(&self) -> usize {
        self.parameter_count
    }
}

impl PreparedStatement for SqliteStatement {
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
        self.connection_open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// One physical SQLite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    id: ConnectionId,
    // None once closed.
    conn: Option<rusqlite::Connection>,
    open: Arc<AtomicBool>,
    in_memory: bool,
    manual_commit: bool,
}

impl SqliteConnection {
    pub(crate) fn new(id: ConnectionId, conn: rusqlite::Connection, in_memory: bool) -> Self {
        Self {
            id,
            conn: Some(conn),
            open: Arc::new(AtomicBool::new(true)),
            in_memory,
            manual_commit: false,
        }
    }

    /// Whether this connection talks to an in-memory database.
    pub const fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Borrow the underlying rusqlite handle.
    pub fn handle(&mut self) -> Result<&mut rusqlite::Connection> {
        self.conn.as_mut().ok_or(Error::UseAfterClose)
    }

    fn handle_ref(&self) -> Result<&rusqlite::Connection> {
        self.conn.as_ref().ok_or(Error::UseAfterClose)
    }

    fn compile(&mut self, sql: &str, generated_keys: bool) -> Result<SqliteStatement> {
        let sql = sql.trim();
        let parameter_count = self
            .handle()?
            .prepare_cached(sql)
            .map_err(Error::backend)?
            .parameter_count();
        Ok(SqliteStatement {
            connection: self.id,
            sql: sql.to_owned(),
            generated_keys,
            parameter_count,
            closed: AtomicBool::new(false),
            connection_open: Arc::clone(&self.open),
        })
    }

    fn check_statement(&self, statement: &SqliteStatement) -> Result<()> {
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

    /// End the open transaction with `verb` and, in manual-commit mode, start the next one.
    fn finish_transaction(&mut self, verb: &str) -> Result<()> {
        let manual = self.manual_commit;
        let conn = self.handle()?;
        if !conn.is_autocommit() {
            conn.execute_batch(verb).map_err(Error::backend)?;
        }
        if manual {
            conn.execute_batch("BEGIN").map_err(Error::backend)?;
        }
        Ok(())
    }
}

impl Connection for SqliteConnection {
    type Statement = SqliteStatement;

    fn connection_id(&self) -> Result<ConnectionId> {
        Ok(self.id)
    }

    fn execute(&mut self, sql: &str, params_in: &[Value]) -> Result<usize> {
        self.handle()?
            .execute(sql, params(params_in))
            .map_err(Error::backend)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.handle()?.execute_batch(sql).map_err(Error::backend)
    }

    fn query(&mut self, sql: &str, params_in: &[Value]) -> Result<Vec<Row>> {
        let conn = self.handle()?;
        let mut stmt = conn.prepare(sql).map_err(Error::backend)?;
        let columns = stmt.column_count();
        let rows = stmt.query(params(params_in)).map_err(Error::backend)?;
        collect_rows(rows, columns)
    }

    fn prepare(&mut self, sql: &str) -> Result<SqliteStatement> {
        self.compile(sql, false)
    }

    fn prepare_with_generated_keys(&mut self, sql: &str) -> Result<SqliteStatement> {
        self.compile(sql, true)
    }

    fn execute_prepared(
        &mut self,
        statement: &SqliteStatement,
        params_in: &[Value],
    ) -> Result<ExecuteOutcome> {
        self.check_statement(statement)?;
        let conn = self.handle()?;
        let rows_affected = conn
            .prepare_cached(&statement.sql)
            .and_then(|mut stmt| stmt.execute(params(params_in)))
            .map_err(Error::backend)?;
        let generated_key = statement
            .generated_keys
            .then(|| conn.last_insert_rowid());
        Ok(ExecuteOutcome {
            rows_affected,
            generated_key,
        })
    }

    fn query_prepared(
        &mut self,
        statement: &SqliteStatement,
        params_in: &[Value],
    ) -> Result<Vec<Row>> {
        self.check_statement(statement)?;
        let conn = self.handle()?;
        let mut stmt = conn.prepare_cached(&statement.sql).map_err(Error::backend)?;
        let columns = stmt.column_count();
        let rows = stmt.query(params(params_in)).map_err(Error::backend)?;
        collect_rows(rows, columns)
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        Ok(self.handle()?.last_insert_rowid())
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        let conn = self.handle()?;
        match (enabled, conn.is_autocommit()) {
            (true, false) => conn.execute_batch("COMMIT").map_err(Error::backend)?,
            (false, true) => conn.execute_batch("BEGIN").map_err(Error::backend)?,
            _ => {}
        }
        self.manual_commit = !enabled;
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool> {
        self.handle_ref()?;
        Ok(!self.manual_commit)
    }

    fn commit(&mut self) -> Result<()> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.finish_transaction("ROLLBACK")
    }

    /// Also rolls back a transaction opened with an explicit `BEGIN`.
    fn reset(&mut self) -> Result<()> {
        self.manual_commit = false;
        let conn = self.handle()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK").map_err(Error::backend)?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn is_valid(&mut self, _timeout: Duration) -> bool {
        self.conn.as_ref().is_some_and(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok()
        })
    }

    fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.open.store(false, Ordering::Release);
        conn.close().map_err(|(_, e)| Error::backend(e))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> SqliteConnection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut conn = SqliteConnection::new(ConnectionId::next(), conn, true);
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT, b BLOB, r REAL)")
            .unwrap();
        conn
    }

    #[test]
    fn test_values_round_through_sqlite() {
        let mut conn = open();
        let inserted = conn
            .execute(
                "INSERT INTO t (v, b, r) VALUES (?, ?, ?)",
                &["hello".into(), vec![1u8, 2, 3].into(), 2.5.into()],
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let row = conn
            .query_row("SELECT id, v, b, r, NULL FROM t", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.get(0), Some(&Value::Integer(1)));
        assert_eq!(row.get(1).and_then(Value::as_str), Some("hello"));
        assert_eq!(row.get(2).and_then(Value::as_bytes), Some(&[1u8, 2, 3][..]));
        assert_eq!(row.get(3).and_then(Value::as_f64), Some(2.5));
        assert!(row.get(4).unwrap().is_null());
    }

    #[test]
    fn test_prepared_generated_keys() {
        let mut conn = open();
        let insert = conn
            .prepare_with_generated_keys("INSERT INTO t (v) VALUES (?)")
            .unwrap();
        assert_eq!(insert.parameter_count(), 1);

        let first = conn.execute_prepared(&insert, &["a".into()]).unwrap();
        let second = conn.execute_prepared(&insert, &["b".into()]).unwrap();
        assert_eq!(first.generated_key, Some(1));
        assert_eq!(second.generated_key, Some(2));
        assert_eq!(conn.last_insert_id().unwrap(), 2);

        let plain = conn.prepare("INSERT INTO t (v) VALUES (?)").unwrap();
        let outcome = conn.execute_prepared(&plain, &["c".into()]).unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.generated_key, None);
    }

    #[test]
    fn test_prepare_reports_syntax_errors() {
        let mut conn = open();
        assert!(conn.prepare("SELEC nonsense").unwrap_err().is_backend());
    }

    #[test]
    fn test_statement_bound_to_its_connection() {
        let mut a = open();
        let mut b = open();
        let statement = a.prepare("SELECT v FROM t").unwrap();

        let err = b.query_prepared(&statement, &[]).unwrap_err();
        assert!(matches!(err, Error::StatementMismatch { .. }));

        statement.close();
        assert!(a.query_prepared(&statement, &[]).unwrap_err().is_use_after_close());
    }

    #[test]
    fn test_manual_commit_and_rollback() {
        let mut conn = open();
        conn.set_auto_commit(false).unwrap();
        assert!(!conn.auto_commit().unwrap());

        conn.execute("INSERT INTO t (v) VALUES ('kept')", &[]).unwrap();
        conn.commit().unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('dropped')", &[]).unwrap();
        conn.rollback().unwrap();
        conn.set_auto_commit(true).unwrap();

        let rows = conn.query("SELECT v FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0).and_then(Value::as_str), Some("kept"));
        assert!(conn.auto_commit().unwrap());
    }

    #[test]
    fn test_reset_discards_uncommitted_work() {
        let mut conn = open();
        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('pending')", &[]).unwrap();
        conn.reset().unwrap();
        assert!(conn.auto_commit().unwrap());

        conn.execute_batch("BEGIN; INSERT INTO t (v) VALUES ('explicit');")
            .unwrap();
        conn.reset().unwrap();
        assert!(conn.handle().unwrap().is_autocommit());

        let row = conn.query_row("SELECT COUNT(*) FROM t", &[]).unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_text_that_is_not_utf8_comes_back_as_bytes() {
        let mut conn = open();
        let row = conn
            .query_row("SELECT CAST(x'c328' AS TEXT), CAST(x'c3a9' AS TEXT)", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.get(0), Some(&Value::Blob(vec![0xc3, 0x28])));
        assert_eq!(row.get(1).and_then(Value::as_str), Some("\u{e9}"));
    }

    #[test]
    fn test_close_invalidates_statements() {
        let mut conn = open();
        let statement = conn.prepare("SELECT 1").unwrap();
        assert!(statement.is_usable());
        assert!(conn.is_valid(Duration::from_millis(100)));

        conn.close().unwrap();
        conn.close().unwrap();

        assert!(conn.is_closed());
        assert!(!conn.is_valid(Duration::from_millis(100)));
        assert!(!statement.is_usable());
        assert!(conn.execute("SELECT 1", &[]).unwrap_err().is_use_after_close());
    }
}
