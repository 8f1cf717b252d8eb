//! Shared prepared statement cache.
//!
//! Entries are keyed by the owning connection, the trimmed query text, and
//! whether the statement reports generated keys. Validity is checked on every
//! hit, so a statement whose connection went away is recompiled rather than
//! returned. Stale entries are otherwise swept lazily through [`StatementCache::cleanup`].
//!
//! The cache is best-effort: a miss costs one compilation, never an error, and a
//! capacity of zero turns it into a pass-through.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::Result;
use crate::connection::{Connection, ConnectionId, PreparedStatement};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    connection: ConnectionId,
    sql: String,
    generated_keys: bool,
}

impl StatementKey {
    pub fn new(connection: ConnectionId, sql: &str, generated_keys: bool) -> Self {
        Self {
            connection,
            sql: sql.trim().to_owned(),
            generated_keys,
        }
    }

    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub const fn generated_keys(&self) -> bool {
        self.generated_keys
    }
}

/// Cache counters snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct CacheInner<S> {
    entries: Option<LruCache<StatementKey, Arc<S>>>,
    hits: u64,
    misses: u64,
}

impl<S> CacheInner<S> {
    #[allow(clippy::cast_precision_loss)]
    fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct StatementCache<S> {
    inner: Mutex<CacheInner<S>>,
}

impl<S> std::fmt::Debug for StatementCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StatementCache")
            .field("size", &inner.entries.as_ref().map_or(0, LruCache::len))
            .field("hits", &inner.hits)
            .field("misses", &inner.misses)
            .finish_non_exhaustive()
    }
}

impl<S: PreparedStatement> StatementCache<S> {
    /// Create a cache holding up to `capacity` statements; zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: NonZeroUsize::new(capacity).map(LruCache::new),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().entries.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .entries
            .as_ref()
            .map_or(0, |entries| entries.cap().get())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.inner.lock().hits
    }

    pub fn misses(&self) -> u64 {
        self.inner.lock().misses
    }

    pub fn hit_rate(&self) -> f64 {
        self.inner.lock().hit_rate()
    }

    /// Whether a usable entry exists for the key, without touching LRU order.
    pub fn contains(&self, connection: ConnectionId, sql: &str, generated_keys: bool) -> bool {
        let key = StatementKey::new(connection, sql, generated_keys);
        self.inner
            .lock()
            .entries
            .as_ref()
            .and_then(|entries| entries.peek(&key))
            .is_some_and(|statement| statement.is_usable())
    }

    /// Return the cached statement for `(conn, sql, wants_generated_keys)`,
    /// compiling and storing it on a miss.
    ///
    /// Compilation runs outside the cache lock.
    pub fn get<C>(&self, conn: &mut C, sql: &str, wants_generated_keys: bool) -> Result<Arc<S>>
    where
        C: Connection<Statement = S> + ?Sized,
    {
        let key = StatementKey::new(conn.connection_id()?, sql, wants_generated_keys);

        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if let Some(entries) = inner.entries.as_mut() {
                let cached = entries
                    .get(&key)
                    .map(|statement| statement.is_usable().then(|| Arc::clone(statement)));
                match cached {
                    Some(Some(statement)) => {
                        inner.hits += 1;
                        return Ok(statement);
                    }
                    Some(None) => {
                        entries.pop(&key);
                        tracing::debug!(connection.id = %key.connection, "evicted stale statement");
                    }
                    None => {}
                }
            }
            inner.misses += 1;
        }

        let statement = if wants_generated_keys {
            conn.prepare_with_generated_keys(key.sql())?
        } else {
            conn.prepare(key.sql())?
        };
        let statement = Arc::new(statement);

        if let Some(entries) = self.inner.lock().entries.as_mut() {
            entries.put(key, Arc::clone(&statement));
        }
        Ok(statement)
    }

    /// Evict every entry that is no longer usable. Returns the number evicted.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.entries.as_mut() else {
            return 0;
        };
        let stale: Vec<StatementKey> = entries
            .iter()
            .filter(|(_, statement)| !statement.is_usable())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    /// Close and evict every entry compiled by `connection`.
    pub fn evict_connection(&self, connection: ConnectionId) -> usize {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.entries.as_mut() else {
            return 0;
        };
        let owned: Vec<StatementKey> = entries
            .iter()
            .filter(|(key, _)| key.connection == connection)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &owned {
            if let Some(statement) = entries.pop(key) {
                statement.close();
            }
        }
        owned.len()
    }

    /// Close every cached statement and empty the cache. Returns the number closed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.hits = 0;
        inner.misses = 0;
        let Some(entries) = inner.entries.as_mut() else {
            return 0;
        };
        let closed = entries.len();
        for (_, statement) in entries.iter() {
            statement.close();
        }
        entries.clear();
        closed
    }

    pub fn stats(&self) -> CacheStatistics {
        let inner = self.inner.lock();
        CacheStatistics {
            size: inner.entries.as_ref().map_or(0, LruCache::len),
            capacity: inner.entries.as_ref().map_or(0, |entries| entries.cap().get()),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: inner.hit_rate(),
        }
    }
}
