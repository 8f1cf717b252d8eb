//! Bounded blocking connection pool.
//!
//! One mutex guards the idle queue, the live-connection counter and the
//! shutdown flag; a condition variable wakes waiters when capacity frees up.
//! Connection creation, liveness probes and native closes all run with the
//! mutex released.
//!
//! # Capacity
//!
//! A slot is reserved (counter incremented) before a connection is created and
//! released if creation fails, so `total <= max_size` holds at every instant,
//! including during creation.
//!
//! # Return path
//!
//! Closing a [`PooledConnection`] hands the raw connection back. A healthy one
//! goes to the head of the idle queue; an unhealthy one is destroyed and frees
//! its slot; after shutdown every returned connection is destroyed.

// Intentionally omits connection details from Debug output.
#![allow(clippy::missing_fields_in_debug)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionId};
use crate::factory::{ConnectionFactory, NoSetup, SessionSetup};
use crate::proxy::PooledConnection;
use crate::slot::{DiscardReason, Slot};
use crate::statement_cache::StatementCache;
use crate::stats::{Counters, PoolStats};
use crate::{Error, Result};

/// Statement type produced by a factory's connections.
pub type StatementOf<F> =
    <<F as ConnectionFactory>::Connection as Connection>::Statement;

/// How often an interruptible wait rechecks its token.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cancellation token for [`Pool::acquire_interruptible`].
///
/// Clones share the same flag. Setting it wakes the waiter within a few
/// milliseconds; the flag stays set until [`Interrupt::clear`] is called.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct PoolState<C> {
    /// Used as a stack: the most recently returned connection is reused first.
    idle: Vec<Slot<C>>,
    /// Raw connections in existence, including ones being created.
    total: usize,
    shut_down: bool,
}

impl<C> PoolState<C> {
    /// Give back a slot reserved by a creation or held by a discarded connection.
    ///
    /// Shutdown resets the counter, so nothing is released after it.
    fn release_slot(&mut self) {
        if !self.shut_down {
            self.total = self.total.saturating_sub(1);
        }
    }
}

pub(crate) struct Shared<F: ConnectionFactory> {
    pub(crate) factory: F,
    setup: Box<dyn SessionSetup<F::Connection>>,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    available: Condvar,
    pub(crate) statements: StatementCache<StatementOf<F>>,
    counters: Counters,
}

impl<F: ConnectionFactory> Shared<F> {
    pub(crate) fn endpoint(&self) -> &str {
        self.factory.endpoint()
    }

    /// Create and set up one raw connection. The caller holds a reserved slot.
    fn open_slot(&self) -> Result<Slot<F::Connection>> {
        let id = ConnectionId::next();
        let mut conn = self.factory.connect(id)?;
        if let Err(err) = self.setup.on_connect(&mut conn) {
            if let Err(close_err) = conn.close() {
                tracing::debug!(connection.id = %id, error = %close_err, "native close failed");
            }
            return Err(err);
        }
        self.counters.record_created();
        tracing::debug!(pool.endpoint = %self.endpoint(), connection.id = %id, "opened connection");
        Ok(Slot::new(id, conn))
    }

    /// Destroy a raw connection that already left the pool's bookkeeping.
    fn destroy(&self, slot: Slot<F::Connection>, reason: DiscardReason) {
        let id = slot.id;
        slot.destroy();
        self.counters.record_destroyed();
        let evicted = self.statements.evict_connection(id);
        tracing::debug!(
            pool.endpoint = %self.endpoint(),
            connection.id = %id,
            reason = %reason,
            statements_evicted = evicted,
            "discarded connection"
        );
    }

    /// Return path for a proxy being closed.
    pub(crate) fn check_in(&self, mut slot: Slot<F::Connection>) {
        if self.state.lock().shut_down {
            self.destroy(slot, DiscardReason::PoolShutDown);
            return;
        }

        let health = slot
            .health(self.config.validation_timeout)
            .or_else(|| slot.reset());

        let mut state = self.state.lock();
        if state.shut_down {
            drop(state);
            self.destroy(slot, DiscardReason::PoolShutDown);
            return;
        }
        match health {
            None => {
                slot.check_in();
                tracing::trace!(connection.id = %slot.id, "returned connection");
                state.idle.push(slot);
                drop(state);
                self.available.notify_one();
            }
            Some(reason) => {
                state.release_slot();
                drop(state);
                self.available.notify_one();
                self.destroy(slot, reason);
            }
        }
    }
}

impl<F: ConnectionFactory> Drop for Shared<F> {
    fn drop(&mut self) {
        let idle = std::mem::take(&mut self.state.get_mut().idle);
        for slot in idle {
            slot.destroy();
        }
    }
}

/// Thread-safe pool of connections to one endpoint.
///
/// Cloning is cheap and every clone refers to the same pool.
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Pool")
            .field("endpoint", &self.shared.endpoint())
            .field("max_size", &self.shared.config.max_size)
            .field("total", &state.total)
            .field("idle", &state.idle.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Build a pool and pre-warm it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration. Pre-warm
    /// failures are logged and skipped.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        Self::with_setup(factory, config, NoSetup)
    }

    /// Build a pool whose fresh connections go through `setup` before first use.
    pub fn with_setup(
        factory: F,
        config: PoolConfig,
        setup: impl SessionSetup<F::Connection>,
    ) -> Result<Self> {
        config.validate()?;

        let statements = StatementCache::new(config.statement_cache_capacity);
        let pool = Self {
            shared: Arc::new(Shared {
                factory,
                setup: Box::new(setup),
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    total: 0,
                    shut_down: false,
                }),
                available: Condvar::new(),
                statements,
                counters: Counters::default(),
            }),
        };

        let warmed = pool.prewarm();
        tracing::info!(
            pool.endpoint = %pool.endpoint(),
            max_size = pool.shared.config.max_size,
            prewarmed = warmed,
            "connection pool ready"
        );
        Ok(pool)
    }

    fn prewarm(&self) -> usize {
        let shared = &self.shared;
        let mut warmed = 0;
        for _ in 0..shared.config.effective_prewarm() {
            {
                let mut state = shared.state.lock();
                if state.total >= shared.config.max_size {
                    break;
                }
                state.total += 1;
            }
            match shared.open_slot() {
                Ok(slot) => {
                    shared.state.lock().idle.push(slot);
                    shared.available.notify_one();
                    warmed += 1;
                }
                Err(err) => {
                    shared.state.lock().release_slot();
                    tracing::warn!(
                        pool.endpoint = %shared.endpoint(),
                        error = %err,
                        "pre-warm connection failed"
                    );
                }
            }
        }
        warmed
    }

    /// Check out a connection, blocking up to `max_wait` when at capacity.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolClosed`] after [`Pool::shutdown`]
    /// - [`Error::ResourceExhausted`] when no connection frees up in time
    /// - [`Error::Backend`] when a new connection cannot be created
    pub fn acquire(&self) -> Result<PooledConnection<F>> {
        self.acquire_inner(None)
    }

    /// Like [`Pool::acquire`], but gives up with [`Error::Interrupted`] once
    /// `interrupt` is set.
    pub fn acquire_interruptible(&self, interrupt: &Interrupt) -> Result<PooledConnection<F>> {
        self.acquire_inner(Some(interrupt))
    }

    fn acquire_inner(&self, interrupt: Option<&Interrupt>) -> Result<PooledConnection<F>> {
        let shared = &self.shared;
        let started = Instant::now();
        // `None` when the wait bound is too large to represent: wait without one.
        let deadline = started.checked_add(shared.config.max_wait);
        let mut blocked = false;

        let mut state = shared.state.lock();
        loop {
            if state.shut_down {
                return Err(Error::PoolClosed);
            }
            if interrupt.is_some_and(Interrupt::is_interrupted) {
                return Err(Error::Interrupted);
            }

            if let Some(mut slot) = state.idle.pop() {
                let timeout = shared.config.validation_timeout;
                let health = MutexGuard::unlocked(&mut state, || slot.health(timeout));
                if state.shut_down {
                    drop(state);
                    shared.destroy(slot, DiscardReason::PoolShutDown);
                    return Err(Error::PoolClosed);
                }
                match health {
                    None => {
                        drop(state);
                        return Ok(self.check_out(slot));
                    }
                    Some(reason) => {
                        state.release_slot();
                        MutexGuard::unlocked(&mut state, || shared.destroy(slot, reason));
                        continue;
                    }
                }
            }

            if state.total < shared.config.max_size {
                state.total += 1;
                let created = MutexGuard::unlocked(&mut state, || shared.open_slot());
                return match created {
                    Ok(slot) if state.shut_down => {
                        drop(state);
                        shared.destroy(slot, DiscardReason::PoolShutDown);
                        Err(Error::PoolClosed)
                    }
                    Ok(slot) => {
                        drop(state);
                        Ok(self.check_out(slot))
                    }
                    Err(err) => {
                        state.release_slot();
                        drop(state);
                        shared.available.notify_one();
                        tracing::warn!(
                            pool.endpoint = %shared.endpoint(),
                            error = %err,
                            "failed to create connection"
                        );
                        Err(err)
                    }
                };
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                drop(state);
                shared.counters.record_timeout();
                let waited = started.elapsed();
                tracing::debug!(
                    pool.endpoint = %shared.endpoint(),
                    waited_ms = waited.as_millis(),
                    "timed out waiting for a connection"
                );
                return Err(Error::ResourceExhausted { waited });
            }
            if !blocked {
                blocked = true;
                shared.counters.record_wait();
            }
            let poll_at = interrupt.map(|_| now + INTERRUPT_POLL_INTERVAL);
            match (deadline, poll_at) {
                (Some(deadline), Some(poll_at)) => {
                    shared.available.wait_until(&mut state, deadline.min(poll_at));
                }
                (Some(wake_at), None) | (None, Some(wake_at)) => {
                    shared.available.wait_until(&mut state, wake_at);
                }
                (None, None) => shared.available.wait(&mut state),
            }
        }
    }

    fn check_out(&self, mut slot: Slot<F::Connection>) -> PooledConnection<F> {
        slot.check_out();
        tracing::trace!(connection.id = %slot.id, "checked out connection");
        PooledConnection::new(slot, Arc::clone(&self.shared))
    }

    /// Close every idle connection and refuse further checkouts. Idempotent.
    ///
    /// Connections checked out at this point are destroyed when returned.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        let drained = {
            let mut state = shared.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.total = 0;
            std::mem::take(&mut state.idle)
        };
        shared.available.notify_all();

        let closed = drained.len();
        for slot in drained {
            shared.destroy(slot, DiscardReason::PoolShutDown);
        }
        let statements = shared.statements.clear();
        tracing::info!(
            pool.endpoint = %shared.endpoint(),
            connections_closed = closed,
            statements_closed = statements,
            "connection pool shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shut_down
    }

    pub fn stats(&self) -> PoolStats {
        let (total, idle, shut_down) = {
            let state = self.shared.state.lock();
            (state.total, state.idle.len(), state.shut_down)
        };
        let (created, destroyed, waits, timeouts) = self.shared.counters.snapshot();
        PoolStats {
            endpoint: self.endpoint().to_owned(),
            max_size: self.shared.config.max_size,
            total,
            idle,
            active: total.saturating_sub(idle),
            shut_down,
            created,
            destroyed,
            waits,
            timeouts,
        }
    }

    pub fn statement_cache(&self) -> &StatementCache<StatementOf<F>> {
        &self.shared.statements
    }

    pub fn endpoint(&self) -> &str {
        self.shared.endpoint()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Whether both handles refer to the same pool.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }
}
