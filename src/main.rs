//! Audio tour guide - plays narration as the listener walks past points of interest
//!
//! Module structure:
//! - `domain/` - Core types (POI, coordinates, events), distance, status table
//! - `io/` - External interfaces (location sources, HTTP endpoint)
//! - `services/` - Business logic (Reconciler, registry, playback)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use audio_tour::infra::{Config, LocationSourceKind, Metrics};
use audio_tour::io::{create_location_feed, GuideControl, LocationSource, MqttSource, ReplaySource};
use audio_tour::services::{create_playback_worker, output_from_config, PoiRegistry, Reconciler};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Location-triggered audio tour guide
#[derive(Parser, Debug)]
#[command(name = "audio-tour", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: PathBuf,

    /// Replay a recorded JSONL walk instead of the configured location source
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Simulate playback instead of spawning the audio player
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-fix and per-status visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "audio-tour starting");

    let args = Args::parse();

    let mut config = Config::load_from_path(&args.config)?;
    if let Some(replay) = args.replay {
        config = config.with_replay_file(replay);
    }
    if args.simulate {
        config = config.with_simulated_playback();
    }

    let source_str = match config.location_source() {
        LocationSourceKind::Mqtt => "mqtt",
        LocationSourceKind::Replay => "replay",
    };
    info!(
        config_file = %config.config_file(),
        pois = %config.pois().len(),
        approach_multiplier = %config.approach_multiplier(),
        hysteresis_factor = %config.hysteresis_factor(),
        location_source = %source_str,
        fix_timeout_secs = %config.fix_timeout_secs(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    let registry =
        PoiRegistry::from_config(config.pois()).context("Invalid POI configuration")?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Every guide input funnels through this channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    // Start playback worker (reports session outcomes back on the event channel)
    let output = output_from_config(&config);
    let (cmd_tx, worker) = create_playback_worker(output, event_tx.clone(), metrics.clone(), 16);
    let worker_handle = tokio::spawn(worker.run());

    let mut reconciler = Reconciler::new(&config, registry, cmd_tx, metrics.clone());
    let status_rx = reconciler.status_feed();

    // Start location feed
    let source: Box<dyn LocationSource> = match config.location_source() {
        LocationSourceKind::Replay => Box::new(ReplaySource::from_file(
            config.replay_file(),
            Duration::from_millis(config.replay_interval_ms()),
        )?),
        LocationSourceKind::Mqtt => Box::new(MqttSource::new(&config)),
    };
    let command_tx = event_tx.clone();
    let (feed_control, feed) = create_location_feed(
        source,
        event_tx,
        Duration::from_secs(config.fix_timeout_secs()),
        metrics.clone(),
    );
    tokio::spawn(feed.run(shutdown_rx.clone()));
    feed_control.start();

    // Start metrics/status/command HTTP server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let http_metrics = metrics.clone();
        let http_status = status_rx.clone();
        let http_control = GuideControl::new(command_tx, feed_control.clone());
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = audio_tour::io::http::start_http_server(
                http_port,
                http_metrics,
                http_status,
                http_control,
                http_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Log the playing POI whenever it changes
    let mut status_log_rx = status_rx;
    tokio::spawn(async move {
        let mut last_playing = None;
        while status_log_rx.changed().await.is_ok() {
            let snapshot = status_log_rx.borrow_and_update().clone();
            if snapshot.playing != last_playing {
                let name = snapshot
                    .playing
                    .as_ref()
                    .and_then(|id| snapshot.pois.iter().find(|p| &p.id == id))
                    .map(|p| p.name.as_str())
                    .unwrap_or("-");
                info!(playing = ?snapshot.playing.as_ref().map(|id| id.as_str()), name = %name, "now_playing");
                last_playing = snapshot.playing.clone();
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        feed_control.stop();
        let _ = shutdown_tx.send(true);
    });

    // Run reconciler - consumes events until shutdown
    reconciler.run(event_rx, shutdown_rx).await;

    // Dropping the reconciler closes the command channel and stops the worker
    drop(reconciler);
    worker_handle.await.context("playback worker panicked")?;

    info!("audio-tour shutdown complete");
    Ok(())
}
