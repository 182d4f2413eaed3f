//! slicecopy entry point.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Serialize;
use slicecopy_transfer::{
    ProgressTracker, SpeedCalculator, TransferConfig, WriterRegistry, calculate_file_checksum,
    copy_file_parallel, copy_file_with,
};
use tracing_subscriber::EnvFilter;

/// Copy a large file slice by slice.
#[derive(Debug, Parser)]
#[command(name = "slicecopy", version, about)]
struct Cli {
    /// File to copy.
    source: PathBuf,

    /// Destination file (created or overwritten).
    destination: PathBuf,

    /// Slice size in bytes.
    #[arg(long, value_name = "BYTES")]
    slice_size: Option<u64>,

    /// Concurrent senders.
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Configuration file (TOML).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Compare SHA-256 of source and destination after the copy.
    #[arg(long)]
    verify: bool,

    /// Print a JSON summary on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CopySummary {
    source: PathBuf,
    destination: PathBuf,
    bytes: u64,
    slice_size: u64,
    workers: usize,
    elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

fn apply_overrides(mut transfer: TransferConfig, cli: &Cli) -> TransferConfig {
    if let Some(slice_size) = cli.slice_size {
        transfer.slice_size = slice_size;
    }
    if let Some(workers) = cli.workers {
        transfer.workers = workers;
    }
    transfer
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = config::AppConfig::load(cli.config.as_deref())?;

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&app_config.log_level)),
        )
        .init();

    let transfer = apply_overrides(app_config.transfer, &cli);
    transfer.validate().context("invalid transfer configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %cli.source.display(),
        destination = %cli.destination.display(),
        slice_size = transfer.slice_size,
        workers = transfer.workers,
        "starting copy"
    );

    let registry = WriterRegistry::new();
    let tracker = ProgressTracker::new(registry.clone(), Some(transfer.progress_interval()))
        .with_idle_timeout(transfer.idle_timeout());

    let speed = Arc::new(SpeedCalculator::new(None, None));
    let last_size = Arc::new(AtomicU64::new(0));
    tracker.on_progress(Box::new(move |p| {
        let previous = last_size.swap(p.current_size, Ordering::Relaxed);
        speed.add_sample(p.current_size.saturating_sub(previous));
        tracing::info!(
            identity = %p.identity,
            percent = %format!("{:.1}", p.percent),
            bytes = p.current_size,
            total = p.total,
            bytes_per_sec = speed.bytes_per_second() as u64,
            eta = ?speed.eta(p.remaining()),
            "progress"
        );
    }));

    let started = Instant::now();
    tracker.start();

    let result = {
        let (source, destination) = (cli.source.clone(), cli.destination.clone());
        let registry = registry.clone();
        let transfer = transfer.clone();
        tokio::task::spawn_blocking(move || {
            if transfer.workers > 1 {
                copy_file_parallel(
                    &source,
                    &destination,
                    &registry,
                    transfer.slice_size,
                    transfer.workers,
                )
            } else {
                copy_file_with(&source, &destination, &registry, transfer.slice_size)
            }
        })
        .await?
    };
    tracker.stop();

    result.with_context(|| {
        format!(
            "copying {} to {}",
            cli.source.display(),
            cli.destination.display()
        )
    })?;

    let elapsed = started.elapsed();
    let bytes = std::fs::metadata(&cli.destination)?.len();

    let checksum = if cli.verify {
        let src = calculate_file_checksum(&cli.source)?;
        let dst = calculate_file_checksum(&cli.destination)?;
        if src != dst {
            bail!("checksum mismatch: source {src}, destination {dst}");
        }
        tracing::info!(checksum = %dst, "destination verified");
        Some(dst)
    } else {
        None
    };

    tracing::info!(bytes, elapsed_ms = elapsed.as_millis() as u64, "copy finished");

    if cli.json {
        let summary = CopySummary {
            source: cli.source,
            destination: cli.destination,
            bytes,
            slice_size: transfer.slice_size,
            workers: transfer.workers,
            elapsed_ms: elapsed.as_millis(),
            checksum,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
