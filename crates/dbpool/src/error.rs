//! Error types for the connection pool.
//!
//! Only exhaustion, shutdown, interruption and misuse reach callers. A connection
//! that turns out to be broken is discarded and replaced inside the pool and never
//! shows up here.

use std::time::Duration;

use thiserror::Error;

/// Boxed driver error carried by [`Error::Backend`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No connection became available within the configured wait bound.
    #[error("no connection available after waiting {waited:?}")]
    ResourceExhausted { waited: Duration },

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Operation on a connection or statement that was already closed.
    #[error("connection is closed")]
    UseAfterClose,

    /// A blocked acquire was interrupted through its [`Interrupt`](crate::Interrupt) token.
    #[error("wait for a pooled connection was interrupted")]
    Interrupted,

    /// A prepared statement was handed to a connection that did not prepare it.
    #[error("statement belongs to connection {owner}, not {used_on}")]
    StatementMismatch { owner: u64, used_on: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by the database driver.
    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),
}

impl Error {
    /// Wrap any driver error.
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    #[must_use]
    pub const fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }

    #[must_use]
    pub const fn is_pool_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    #[must_use]
    pub const fn is_use_after_close(&self) -> bool {
        matches!(self, Self::UseAfterClose)
    }

    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Whether retrying the same call later can succeed.
    ///
    /// Only exhaustion qualifies: a closed pool or a closed proxy stays closed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_resource_exhausted()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
