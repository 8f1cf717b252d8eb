//! Error types for the soak tool

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pool error: {0}")]
    Pool(#[from] dbpool::Error),

    #[error("Workload error: {0}")]
    Workload(String),
}

impl Error {
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    #[must_use]
    pub const fn is_pool(&self) -> bool {
        matches!(self, Self::Pool(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
