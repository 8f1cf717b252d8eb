//! Concurrent insert/read-back workload against a pooled SQLite endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use dbpool::{CacheStatistics, Connection, Pool, PoolStats, PooledConnection, Value};
use dbpool_sqlite::SqliteFactory;
use serde::Serialize;

use crate::config::WorkloadConfig;
use crate::{Error, Result};

/// Acquisitions attempted per checkout before giving up.
pub const MAX_ACQUIRE_ATTEMPTS: u32 = 5;

const CREATE_PROBE_TABLE: &str = "CREATE TABLE IF NOT EXISTS dbpool_probe (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker INTEGER NOT NULL,
    iteration INTEGER NOT NULL,
    payload TEXT NOT NULL
)";
const INSERT_PROBE: &str = "INSERT INTO dbpool_probe (worker, iteration, payload) VALUES (?, ?, ?)";
const SELECT_PROBE: &str = "SELECT payload FROM dbpool_probe WHERE id = ?";

/// Outcome of one workload run, printed as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub workers: usize,
    pub iterations: usize,
    /// Rows inserted and verified.
    pub inserted: u64,
    /// Acquisitions repeated after `ResourceExhausted`.
    pub retries: u64,
    pub elapsed_ms: u64,
    pub pool: PoolStats,
    pub statements: CacheStatistics,
}

/// Create the probe table and drive `config.workers` threads against `pool`.
pub fn run(pool: &Pool<SqliteFactory>, config: &WorkloadConfig) -> Result<WorkloadReport> {
    prepare_schema(pool)?;

    let retries = AtomicU64::new(0);
    let started = Instant::now();
    tracing::info!(
        pool.endpoint = pool.endpoint(),
        workers = config.workers,
        iterations = config.iterations,
        "starting workload"
    );

    let per_worker = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.workers)
            .map(|worker| {
                let retries = &retries;
                scope.spawn(move || run_worker(pool, worker, config.iterations, retries))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| Error::Workload("worker thread panicked".into()))?
            })
            .collect::<Result<Vec<u64>>>()
    })?;

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let report = WorkloadReport {
        workers: config.workers,
        iterations: config.iterations,
        inserted: per_worker.iter().sum(),
        retries: retries.load(Ordering::Relaxed),
        elapsed_ms,
        pool: pool.stats(),
        statements: pool.statement_cache().stats(),
    };
    tracing::info!(
        inserted = report.inserted,
        retries = report.retries,
        elapsed_ms,
        "workload finished"
    );
    Ok(report)
}

fn prepare_schema(pool: &Pool<SqliteFactory>) -> Result<()> {
    let mut conn = pool.acquire()?;
    conn.execute_batch(CREATE_PROBE_TABLE)?;
    conn.close()?;
    Ok(())
}

fn run_worker(
    pool: &Pool<SqliteFactory>,
    worker: usize,
    iterations: usize,
    retries: &AtomicU64,
) -> Result<u64> {
    let mut inserted = 0;
    for iteration in 0..iterations {
        let mut conn = acquire_with_retry(pool, retries)?;
        let payload = format!("worker-{worker}-iteration-{iteration}");

        let insert = conn.prepare_cached_with_generated_keys(INSERT_PROBE)?;
        let outcome = conn.execute_prepared(
            &insert,
            &[
                Value::Integer(worker as i64),
                Value::Integer(iteration as i64),
                payload.as_str().into(),
            ],
        )?;
        let id = outcome
            .generated_key
            .ok_or_else(|| Error::Workload("insert returned no generated key".into()))?;

        let select = conn.prepare_cached(SELECT_PROBE)?;
        let rows = conn.query_prepared(&select, &[id.into()])?;
        match rows.first().and_then(|row| row.get(0)).and_then(Value::as_str) {
            Some(found) if found == payload => {}
            other => {
                return Err(Error::Workload(format!(
                    "row {id} read back {other:?}, expected {payload:?}"
                )));
            }
        }

        conn.close()?;
        inserted += 1;
    }
    tracing::debug!(worker, inserted, "worker finished");
    Ok(inserted)
}

/// Acquire, repeating on `ResourceExhausted` up to [`MAX_ACQUIRE_ATTEMPTS`] times.
pub fn acquire_with_retry(
    pool: &Pool<SqliteFactory>,
    retries: &AtomicU64,
) -> Result<PooledConnection<SqliteFactory>> {
    let mut attempt = 1;
    loop {
        match pool.acquire() {
            Ok(conn) => return Ok(conn),
            Err(e) if e.is_retryable() && attempt < MAX_ACQUIRE_ATTEMPTS => {
                retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(attempt, error = %e, "pool exhausted, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
