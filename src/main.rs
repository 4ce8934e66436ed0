// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON + credentials
// - schema:    Strongly typed market bar definitions
// - errors:    Collector failure taxonomy
// - util:      Shared helper utilities (time, symbol handling)
// - metrics:   Lock-free runtime counters
// - exchanges: Exchange adapters, connectors and adapter registry
// - collector: Scheduler, normalizer and validator
// - sink:      Outward bar stream destinations
//
mod config;
mod schema;
mod errors;
mod util;
mod metrics;
mod exchanges;
mod collector;
mod sink;

use std::fs;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use collector::scheduler::{CollectionScheduler, TargetState};
use config::Config;
use exchanges::connector::ExchangeConnector;
use metrics::METRICS;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// This is the main runtime for the multi-exchange OHLCV collector.
//
// Responsibilities:
// - Load configuration
// - Build the sink and the outward channels
// - Build one connector per enabled exchange
// - Run collection cycles until Ctrl-C
// - Shut everything down cleanly (connectors first, then the sink)
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config: Config = load_config(&path)?;

    let sink = sink::build_sink(&config.sink).await?;

    let (bar_tx, bar_rx) = mpsc::channel(config.collection.channel_capacity);
    let (report_tx, mut report_rx) = mpsc::channel(1_024);
    let (shutdown_tx, _) = broadcast::channel(1);

    // --------------------------------------------------------
    // Build connectors for all enabled exchanges
    //
    // Exchanges without resolvable credentials are skipped, not
    // fatal: the rest of the matrix still collects.
    // --------------------------------------------------------
    let mut connectors = Vec::new();
    for exchange_cfg in config.exchanges.iter().filter(|e| e.enabled) {
        if let Err(err) = config::resolve_credentials(&exchange_cfg.credential_ref) {
            log::warn!("skipping exchange '{}': {err}", exchange_cfg.name);
            continue;
        }

        match exchanges::build_connector(exchange_cfg, &config.collection) {
            Ok(conn) => {
                log::info!("starting {} collector", exchange_cfg.name);
                connectors.push(conn);
            }
            Err(err) => {
                log::error!("exchange '{}' not started: {err}", exchange_cfg.name);
            }
        }
    }

    if connectors.is_empty() {
        anyhow::bail!("no usable exchanges configured");
    }

    let scheduler = CollectionScheduler::new(
        connectors.clone(),
        &config.pairs,
        &config.timeframes,
        config.collection.clone(),
        bar_tx,
        report_tx,
        shutdown_tx.clone(),
    );

    // --------------------------------------------------------
    // Sink drain: ends once every producer handle is gone
    // --------------------------------------------------------
    let sink_task = tokio::spawn(sink::drain(bar_rx, sink));

    // --------------------------------------------------------
    // Out-of-band failure reports
    // --------------------------------------------------------
    tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            log::warn!("collection failure on {}: {}", report.target, report.error);
        }
    });

    // --------------------------------------------------------
    // Metrics + status reporter (periodic, low-noise)
    // --------------------------------------------------------
    let reporter_task = tokio::spawn({
        let scheduler = scheduler.clone();
        let mut shutdown = shutdown_tx.subscribe();
        async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = tick.tick() => report_status(&scheduler),
                    _ = shutdown.recv() => return,
                }
            }
        }
    });

    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    // --------------------------------------------------------
    // Wait for Ctrl-C, then unwind in dependency order
    // --------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    log::info!("shutdown requested");

    let _ = shutdown_tx.send(());
    for conn in &connectors {
        conn.close().await;
    }

    let _ = scheduler_task.await;
    let _ = reporter_task.await;

    // The drain loop ends once the last producer handle drops.
    drop(scheduler);
    let _ = sink_task.await;

    log::info!("collector stopped");
    Ok(())
}

/// One status line per reporting interval.
fn report_status(scheduler: &CollectionScheduler) {
    let snapshot = scheduler.snapshot();
    let count = |state: TargetState| snapshot.iter().filter(|s| s.state == state).count();

    log::info!(
        "[METRICS] ex={} targets={} emitted={} retrying={} failed={} req={} bars_fetched={} bars_emitted={} bars_rejected={} bars_stored={} retries={} sink_err={}",
        METRICS.exchanges_active.load(Ordering::Relaxed),
        snapshot.len(),
        count(TargetState::Emitted),
        count(TargetState::Retrying),
        count(TargetState::Failed),
        METRICS.requests_sent.load(Ordering::Relaxed),
        METRICS.bars_fetched.load(Ordering::Relaxed),
        METRICS.bars_emitted.load(Ordering::Relaxed),
        METRICS.bars_rejected.load(Ordering::Relaxed),
        METRICS.bars_stored.load(Ordering::Relaxed),
        METRICS.retries.load(Ordering::Relaxed),
        METRICS.sink_errors.load(Ordering::Relaxed),
    );
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes it into
// the strongly typed `Config` structure. The path can be overridden
// as the first CLI argument.
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)?;
    let cfg = serde_json::from_str(&data)?;
    Ok(cfg)
}
