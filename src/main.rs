use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slotbook::config::EngineConfig;
use slotbook::engine::Engine;
use slotbook::notify::NotifyHub;
use slotbook::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env();
    slotbook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let journal_path = config.journal_path();
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::open(&journal_path, notify)?.with_slot_minutes(config.slot_minutes));

    info!("slotbook engine ready");
    info!("  journal: {}", journal_path.display());
    info!("  slot spacing: {} min", config.slot_minutes);
    info!("  compact threshold: {} appends", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reaper_task = tokio::spawn(reaper::run_reaper(engine.clone(), config.reaper_interval));
    let compactor_task = tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    shutdown_signal().await;
    info!("shutdown signal received");
    reaper_task.abort();
    compactor_task.abort();

    if let Err(e) = engine.compact_journal().await {
        warn!("final compaction failed: {e}");
    }
    info!("slotbook stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler not installed: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
