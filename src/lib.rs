//! GitHub Archive Sieve
//!
//! Pipeline that pulls hourly gzip archives of the public GitHub event
//! firehose, filters them by repository and event type, and persists the
//! matches to JSON lines or Parquet.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Hours**: Enumeration of the hourly archive objects in a time window
//! - **I/O**: Resumable HTTP fetching, gzip stream scanning, buffered output
//! - **Filter**: Two-stage repository and event type matching
//! - **Pipeline**: Bounded-concurrency hour processing with metrics
//!
//! # Usage
//!
//! ```no_run
//! use gha_sieve::{parse_timestamp, run_pipeline, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let start = parse_timestamp("2024-03-01")?;
//!     let end = parse_timestamp("2024-03-02")?;
//!     run_pipeline(config, start, end).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod filter;
pub mod hours;
pub mod io;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testsupport;

pub use config::{Config, FilterConfig};
pub use filter::{FilterSpec, Record};
pub use hours::{hour_range, parse_timestamp, HourUnit};
pub use io::{EventSink, HourFetcher};
pub use pipeline::{Metrics, Scheduler, SchedulerConfig, SchedulerStats};

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Run the full ingest pipeline over the given time window.
///
/// Both endpoints are inclusive and are truncated to their containing hour.
pub async fn run_pipeline(
    config: Config,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<SchedulerStats> {
    // Validate configuration
    config.validate()?;

    let units: Vec<HourUnit> = hour_range(start, end).collect();

    tracing::info!("Starting GitHub Archive ingest");
    // An end before the start is a policy outcome, not a fault: the run
    // completes with nothing to do.
    if units.is_empty() {
        tracing::warn!("Time window {} to {} contains no archive hours", start, end);
    } else {
        tracing::info!(
            "Window: {} through {} ({} hours)",
            units[0],
            units[units.len() - 1],
            units.len()
        );
    }

    let filter = FilterSpec::from_config(config.filter.as_ref());
    if filter.is_unconstrained() {
        tracing::info!("No filter configured, keeping every parseable event");
    }

    let fetcher = Arc::new(HourFetcher::new(&config.archive)?);
    let metrics = Metrics::new();

    tracing::info!("Writing matches to {}", config.output.path.display());
    let sink = EventSink::create(&config.output.path, config.output.buffer_capacity)?;

    let scheduler_config = SchedulerConfig {
        workers: config.processing.workers,
        enable_metrics: config.processing.enable_metrics,
        metrics_interval_secs: config.processing.metrics_interval_secs,
        metrics_output_path: config.processing.metrics_output_path.clone(),
        scratch_dir: config.processing.scratch_dir.clone(),
    };

    let scheduler = Scheduler::new(fetcher, Arc::new(filter), metrics, scheduler_config);
    let stats = scheduler.run(units, sink).await?;

    tracing::info!("Ingest complete: {}", stats);
    for (unit, error) in &stats.failures {
        tracing::warn!("Hour {} failed permanently: {}", unit, error);
    }

    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
