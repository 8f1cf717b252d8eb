//! Endpoint key parsing.
//!
//! An endpoint key names one database. Accepted forms:
//!
//! - a filesystem path (`app.db`, `/var/lib/app/app.db`, `~/app.db`)
//! - a `sqlite:` URL (`sqlite:///var/lib/app/app.db`, `sqlite:app.db`, `sqlite::memory:`)
//! - a SQLite `file:` URI, passed through untouched
//! - `:memory:`

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use dbpool::{Error, Result};
use url::Url;

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteEndpoint {
    /// Database file on disk.
    File(PathBuf),
    /// SQLite `file:` URI.
    Uri(String),
    /// Named shared-cache in-memory database, visible to every connection of
    /// the same endpoint for as long as one of them stays open.
    Memory { name: String },
}

impl SqliteEndpoint {
    pub fn parse(key: &str) -> Result<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config("empty SQLite endpoint".into()));
        }
        if key == ":memory:" {
            return Ok(Self::memory());
        }
        if key.starts_with("file:") {
            return Ok(Self::Uri(key.to_owned()));
        }
        if key.starts_with("sqlite:") {
            return Self::parse_url(key);
        }
        expand_home(key).map(Self::File)
    }

    /// A fresh, uniquely named in-memory database.
    pub fn memory() -> Self {
        let seq = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
        Self::Memory {
            name: format!("dbpool-mem-{}-{seq}", std::process::id()),
        }
    }

    fn parse_url(key: &str) -> Result<Self> {
        let url = Url::parse(key)
            .map_err(|e| Error::Config(format!("invalid SQLite URL '{key}': {e}")))?;

        if url.path() == ":memory:" {
            return Ok(Self::memory());
        }
        if url.cannot_be_a_base() {
            // sqlite:relative/app.db
            return expand_home(url.path()).map(Self::File);
        }
        match url.host_str() {
            Some(host) if !host.is_empty() => {
                // sqlite://relative/app.db
                Ok(Self::File(PathBuf::from(format!("{host}{}", url.path()))))
            }
            _ => Url::parse(&format!("file://{}", url.path()))
                .ok()
                .and_then(|file_url| file_url.to_file_path().ok())
                .map(Self::File)
                .ok_or_else(|| Error::Config(format!("SQLite URL '{key}' has no usable path"))),
        }
    }

    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }

    /// Name handed to `sqlite3_open_v2`.
    pub fn open_target(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::Uri(uri) => uri.clone(),
            Self::Memory { name } => format!("file:{name}?mode=memory&cache=shared"),
        }
    }
}

impl fmt::Display for SqliteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Uri(uri) => f.write_str(uri),
            Self::Memory { name } => write!(f, "memory:{name}"),
        }
    }
}

fn expand_home(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| Error::Config("unable to determine HOME directory".into()))?;
        return Ok(PathBuf::from(home).join(rest));
    }
    if path.starts_with('~') {
        return Err(Error::Config(
            "user-specific home directories (~user) are not supported".into(),
        ));
    }
    Ok(PathBuf::from(path))
}
