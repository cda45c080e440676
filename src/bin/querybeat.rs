//! Querybeat - Periodic SQL Metrics Poller
//!
//! Runs the configured queries against a read-only SQLite database every
//! period and publishes one event per result row (or one per two-columns
//! query).
//!
//! Usage:
//!   cargo run --release --bin querybeat
//!
//! Environment variables:
//!   QUERYBEAT_DB_PATH - SQLite database to poll (required)
//!   QUERYBEAT_QUERIES_FILE - JSON list of queries (default: queries.json)
//!   QUERYBEAT_PERIOD_MS - Poll period (default: 10000)
//!   QUERYBEAT_SINK - jsonl or stdout (default: jsonl)

use log::{error, info};
use querybeat::beat_core::{
    run_scheduler, spawn_resume_worker, EventSink, JsonlSink, QueryRunner, ResumeStore,
    SqliteDataSource, StdoutSink,
};
use querybeat::config::{BeatConfig, SinkType};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Querybeat starting");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match BeatConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            return Err(e.into());
        }
    };
    config.log_summary();

    let source = SqliteDataSource::open(&config.db_path)?;
    info!("✅ Database opened read-only");

    let store = Arc::new(ResumeStore::open(&config.resume_file)?);
    let (resume, resume_worker) = spawn_resume_worker(store);

    let sink: Box<dyn EventSink> = match config.sink {
        SinkType::Jsonl => Box::new(JsonlSink::new(
            &config.output_path,
            config.output_max_size_mb,
            config.output_max_rotations,
        )?),
        SinkType::Stdout => Box::new(StdoutSink),
    };
    info!("✅ Sink ready: {}", sink.sink_type());

    let runner = QueryRunner::new(
        Box::new(source),
        sink,
        resume,
        config.translator(),
        config.queries.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_scheduler(runner, config.period, stop_rx));

    info!("✅ Querybeat running (Ctrl+C to stop)");

    shutdown_signal().await;
    info!("🛑 Shutdown requested, finishing current pass...");
    let _ = stop_tx.send(true);

    // The runner owns the last resume handle; once the scheduler returns, the
    // worker sees a closed queue and drains.
    match scheduler.await {
        Ok(report) => info!(
            "   ├─ Passes: {} ok, {} failed",
            report.passes_ok, report.passes_failed
        ),
        Err(e) => error!("❌ Scheduler task failed: {}", e),
    }

    if let Err(e) = resume_worker.await {
        error!("❌ Resume writer task failed: {}", e);
    }

    info!("   └─ Querybeat stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("❌ Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
