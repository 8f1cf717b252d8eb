//! `dbpool` soak tool

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dbpool_cli::config::{self, ConfigBuilder};
use dbpool_cli::{observability, workload};

#[derive(Parser, Debug)]
#[command(name = "dbpool")]
#[command(about = "Exercise a pooled SQLite endpoint with concurrent workers")]
#[command(version)]
struct Args {
    /// Configuration file (default: ./dbpool.toml, ~/.config/dbpool/config.toml, /etc/dbpool/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database endpoint key (path, sqlite: URL, file: URI or :memory:)
    #[arg(short, long)]
    database: Option<String>,

    /// Maximum raw connections
    #[arg(long)]
    max_size: Option<usize>,

    /// Connections opened at startup
    #[arg(long)]
    prewarm: Option<usize>,

    /// Longest wait for a connection, in milliseconds
    #[arg(long)]
    max_wait_ms: Option<u64>,

    /// Statement cache capacity (0 disables)
    #[arg(long)]
    statement_cache: Option<usize>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Checkouts per worker
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Flags override every other configuration layer.
    fn apply(&self, mut builder: ConfigBuilder) -> ConfigBuilder {
        if let Some(database) = &self.database {
            builder = builder.database(database.clone());
        }
        if let Some(size) = self.max_size {
            builder = builder.max_size(size);
        }
        if let Some(prewarm) = self.prewarm {
            builder = builder.prewarm(prewarm);
        }
        if let Some(ms) = self.max_wait_ms {
            builder = builder.max_wait(Duration::from_millis(ms));
        }
        if let Some(capacity) = self.statement_cache {
            builder = builder.statement_cache(capacity);
        }
        if let Some(workers) = self.workers {
            builder = builder.workers(workers);
        }
        if let Some(iterations) = self.iterations {
            builder = builder.iterations(iterations);
        }
        if self.json_logs {
            builder = builder.json_logs(true);
        }
        if self.verbose {
            builder = builder.log_level("debug");
        }
        builder
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let builder = match &args.config {
        Some(path) => config::load_config_from_path(path),
        None => config::load_config(),
    }
    .context("failed to load configuration")?;
    let config = args
        .apply(builder)
        .build()
        .context("invalid configuration")?;

    observability::init_logging(&config.telemetry)?;

    let registry = dbpool_sqlite::registry(config.pool.clone());
    let pool = registry
        .pool(&config.database)
        .with_context(|| format!("failed to open pool for '{}'", config.database))?;

    let outcome = workload::run(&pool, &config.workload);
    registry.shutdown_all();
    let report = outcome.context("workload failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
