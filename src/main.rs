//! combat-etl - combat log ingestion and replay reconstruction
//!
//! Pulls per-match telemetry for tournament event windows, rebuilds combat
//! events and per-player state, and loads everything into SQLite.
//!
//! Module structure:
//! - `domain/` - Core types (RawEvent, CombatEvent, Frame, EventWindow)
//! - `io/` - External interfaces (HTTP fetcher, artifact cache, SQLite, frame egress)
//! - `services/` - Business logic (TemporalIndex, TargetInference, pipelines)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::{Parser, Subcommand};
use combat_etl::domain::{MatchId, WindowId};
use combat_etl::infra::{Config, PipelineMetrics};
use combat_etl::io::{FrameEgress, FsArtifactStore, HttpFetcher, SqliteStore};
use combat_etl::services::{MatchPipeline, TargetInference, WindowPipeline};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// combat-etl - combat log ETL for tournament event windows
#[derive(Parser, Debug)]
#[command(name = "combat-etl", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record recently seen event windows that are not yet known
    Discover,
    /// Fetch, parse and load every match of one event window
    Window {
        /// Event window id
        id: String,
    },
    /// Process every window that is not started or previously failed
    Pending,
    /// Load a single match
    Match {
        /// Match id
        id: String,
        /// Event window the match belongs to
        #[arg(short, long, default_value = "adhoc")]
        window: String,
    },
    /// Reconstruct replay frames for a match and write them as JSONL chunks
    Replay {
        /// Match id
        match_id: String,
        /// Sampling rate override (frames per second)
        #[arg(long)]
        hz: Option<u32>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "combat_etl_starting");

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };

    info!(
        config_file = %config.config_file(),
        raw_dir = %config.raw_dir().display(),
        processed_dir = %config.processed_dir().display(),
        db_path = %config.db_path().display(),
        api_base_url = %config.api_base_url(),
        api_key_set = %config.api_key().is_some(),
        max_attempts = %config.fetch_max_attempts(),
        sample_hz = %config.sample_hz(),
        "config_loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let fetcher = HttpFetcher::new(&config, metrics.clone()).context("Failed to build HTTP client")?;
    let artifacts = FsArtifactStore::new(config.raw_dir());
    let inference = TargetInference::new(config.hitbox());

    let result = run(&args.command, &config, &fetcher, &artifacts, inference, metrics.clone()).await;

    metrics.report().log();
    result
}

async fn run(
    command: &Command,
    config: &Config,
    fetcher: &HttpFetcher,
    artifacts: &FsArtifactStore,
    inference: TargetInference,
    metrics: Arc<PipelineMetrics>,
) -> anyhow::Result<()> {
    let stale_lock = Duration::from_secs(config.stale_lock_secs());

    match command {
        Command::Discover => {
            let store = SqliteStore::open(config.db_path())?;
            let pipeline = WindowPipeline::new(fetcher, artifacts, inference, metrics, stale_lock);
            pipeline.discover(&store, config.discovery_interval_secs()).await?;
        }
        Command::Window { id } => {
            let mut store = SqliteStore::open(config.db_path())?;
            let pipeline = WindowPipeline::new(fetcher, artifacts, inference, metrics, stale_lock);
            pipeline
                .process(&mut store, &WindowId::new(id.as_str()))
                .await
                .with_context(|| format!("Failed to process window {id}"))?;
        }
        Command::Pending => {
            let mut store = SqliteStore::open(config.db_path())?;
            let pipeline = WindowPipeline::new(fetcher, artifacts, inference, metrics, stale_lock);
            let summaries = pipeline.process_pending(&mut store).await?;
            info!(windows = %summaries.len(), "pending_complete");
        }
        Command::Match { id, window } => {
            let mut store = SqliteStore::open(config.db_path())?;
            let pipeline = MatchPipeline::new(fetcher, artifacts, inference, metrics);
            let match_id = MatchId::new(id.as_str());
            let outcome =
                pipeline.run(&mut store, &match_id, &WindowId::new(window.as_str()), true).await;
            if let Some(reason) = outcome.reason {
                anyhow::bail!("match {match_id} failed: {reason}");
            }
        }
        Command::Replay { match_id, hz } => {
            let pipeline = MatchPipeline::new(fetcher, artifacts, inference, metrics);
            let match_id = MatchId::new(match_id.as_str());
            pipeline.fetch_missing(&match_id).await?;
            let parsed = pipeline.parse(&match_id)?;

            let sample_hz = hz.unwrap_or(config.sample_hz()).max(1);
            let egress = FrameEgress::new(config.processed_dir(), &match_id, config.frames_per_chunk());
            let stats = pipeline.export_frames(&parsed, &egress, sample_hz)?;
            info!(
                match_id = %match_id,
                frames = %stats.frames,
                chunks = %stats.chunks,
                dir = %egress.dir().display(),
                sample_hz = %sample_hz,
                "replay_exported"
            );
        }
    }
    Ok(())
}
