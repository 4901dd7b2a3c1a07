use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use tourvault::config;
use tourvault::db;
use tourvault::sync::{ProviderRegistry, SyncWorker};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/tourvault.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let http = reqwest::Client::new();
    let worker = SyncWorker::new(
        pool.clone(),
        Arc::new(ProviderRegistry::new(http)),
        Duration::from_millis(cfg.app.sync_poll_interval_ms),
    );
    let handle = worker.spawn();
    info!("sync worker started");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.abort();
    Ok(())
}
