//! Work distribution and scheduling for hour processing.
//!
//! Hour units go into a shared bounded queue consumed by a small pool of
//! workers. Each worker fetches an hour object to scratch, scans it through
//! the filter, and sends one [`TaskResult`] down a results channel. A single
//! collection loop owns the sink and is the only code that writes to it, so
//! output needs no locking. Every queued unit yields exactly one result,
//! with records from one hour contiguous in the output; no ordering is
//! promised across hours.

use crate::filter::FilterSpec;
use crate::hours::HourUnit;
use crate::io::{scan_object, EventSink, HourFetcher, ScanStats};
use crate::pipeline::{Metrics, MetricsReporter};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Hard ceiling on concurrent archive downloads.
pub const MAX_WORKERS: usize = 4;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of concurrent hour workers, capped at [`MAX_WORKERS`]
    pub workers: usize,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    pub metrics_output_path: Option<String>,

    /// Base directory for in-progress downloads; each run works in its own
    /// subdirectory underneath, under the system temp dir by default
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: MAX_WORKERS,
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
            scratch_dir: None,
        }
    }
}

/// Why an hour unit failed permanently.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The object could not be downloaded within the retry budget.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The decompressed stream ended early; records before the cut were kept.
    #[error("archive stream corrupted: {0}")]
    Truncated(String),

    /// The hour task panicked.
    #[error("hour task panicked: {0}")]
    Panicked(String),
}

/// Outcome of one hour unit. Exactly one of these is produced per queued
/// unit, whether it succeeded, failed, or panicked.
#[derive(Debug)]
pub struct TaskResult {
    pub unit: HourUnit,
    pub records: Vec<crate::filter::Record>,
    pub stats: ScanStats,
    pub bytes_fetched: u64,
    pub error: Option<UnitError>,
}

impl TaskResult {
    fn failed(unit: HourUnit, error: UnitError) -> Self {
        Self {
            unit,
            records: Vec::new(),
            stats: ScanStats::default(),
            bytes_fetched: 0,
            error: Some(error),
        }
    }

    fn panicked(unit: HourUnit, e: &tokio::task::JoinError) -> Self {
        Self::failed(unit, UnitError::Panicked(e.to_string()))
    }
}

/// Scheduler for distributing hour processing across async tasks.
pub struct Scheduler {
    /// Archive fetcher
    fetcher: Arc<HourFetcher>,

    /// Record filter
    filter: Arc<FilterSpec>,

    /// Metrics
    metrics: Arc<Metrics>,

    /// Configuration
    config: SchedulerConfig,
}

// Scratch subdirectories are unique per run: the pid separates
// processes, the sequence separates runs inside one process.
static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(
        fetcher: Arc<HourFetcher>,
        filter: Arc<FilterSpec>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            fetcher,
            filter,
            metrics,
            config,
        }
    }

    fn effective_workers(&self) -> usize {
        if self.config.workers > MAX_WORKERS {
            tracing::warn!(
                "Requested {} workers, capping at {}",
                self.config.workers,
                MAX_WORKERS
            );
            MAX_WORKERS
        } else {
            self.config.workers.max(1)
        }
    }

    /// Run the scheduler over the given hour units, writing matches to `sink`.
    ///
    /// Takes the sink by value: the collection loop inside is its only
    /// writer for the duration of the run, and closes it before returning.
    pub async fn run(&self, units: Vec<HourUnit>, mut sink: EventSink) -> Result<SchedulerStats> {
        let total_hours = units.len();
        let workers = self.effective_workers();

        let scratch_base = match &self.config.scratch_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("gha-sieve"),
        };
        let scratch_dir = scratch_base.join(format!(
            "run-{}-{}",
            std::process::id(),
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&scratch_dir)
            .with_context(|| format!("creating scratch directory {}", scratch_dir.display()))?;

        tracing::info!(
            "Scheduling {} hours for processing ({} workers)",
            total_hours,
            workers
        );

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_hours as u64,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        // Shared work queue, filled upfront and closed
        let (work_tx, work_rx) = async_channel::bounded::<HourUnit>(total_hours.max(1));
        for unit in units {
            let _ = work_tx.send(unit).await;
        }
        work_tx.close();

        let (result_tx, mut result_rx) = mpsc::channel::<TaskResult>(workers * 2);

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let fetcher = self.fetcher.clone();
            let filter = self.filter.clone();
            let metrics = self.metrics.clone();
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let scratch = scratch_dir.clone();

            let handle = tokio::spawn(async move {
                while let Ok(unit) = work_rx.recv().await {
                    let scratch_path = scratch.join(unit.scratch_name());
                    let work =
                        process_unit(fetcher.clone(), filter.clone(), scratch_path.clone(), unit);
                    let result = run_unit(work, scratch_path, unit).await;

                    metrics.add_bytes_fetched(result.bytes_fetched);
                    metrics.add_lines_scanned(result.stats.lines_scanned);
                    metrics.add_lines_parsed(result.stats.lines_parsed);
                    metrics.add_lines_dropped(result.stats.lines_dropped);
                    metrics.add_records_matched(result.records.len() as u64);

                    if result_tx.send(result).await.is_err() {
                        tracing::debug!("Result receiver dropped, stopping worker");
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);

        // Collection loop: sole writer to the sink
        let mut stats = SchedulerStats {
            total_hours,
            ..Default::default()
        };
        let mut done = 0usize;

        while let Some(result) = result_rx.recv().await {
            done += 1;
            let matched = result.records.len();

            for record in result.records {
                sink.write(record)?;
            }
            self.metrics.add_records_written(matched as u64);
            self.metrics.set_sink_flushes(sink.flush_count());
            stats.records_matched += matched as u64;

            match result.error {
                None => {
                    stats.hours_completed += 1;
                    self.metrics.add_hour_completed();
                    tracing::info!(
                        "[{}/{}] {}: {} matched of {} lines",
                        done,
                        total_hours,
                        result.unit,
                        matched,
                        result.stats.lines_scanned
                    );
                }
                Some(error) => {
                    stats.hours_failed += 1;
                    self.metrics.add_hour_failed();
                    tracing::warn!("[{}/{}] {} failed: {}", done, total_hours, result.unit, error);
                    stats.failures.push((result.unit, error));
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        sink.close()?;
        self.metrics.set_sink_flushes(sink.flush_count());
        stats.records_written = sink.records_written();

        // The run directory is ours alone, so take it out wholesale
        if let Err(e) = std::fs::remove_dir_all(&scratch_dir) {
            tracing::debug!(
                "Could not remove scratch directory {}: {}",
                scratch_dir.display(),
                e
            );
        }

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        // Print final summary and optionally save to file
        if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_hours as u64,
            );
            reporter.print_summary();

            if let Some(ref path) = self.config.metrics_output_path {
                let snapshot = self.metrics.snapshot();
                if let Err(e) = snapshot.save_to_file(path) {
                    tracing::warn!("Failed to save metrics to {}: {}", path, e);
                }
            }
        }

        Ok(stats)
    }
}

/// Run one unit's work inside its own task so a panic is contained to
/// that hour, and remove the scratch file whatever the outcome.
async fn run_unit<F>(work: F, scratch_path: PathBuf, unit: HourUnit) -> TaskResult
where
    F: std::future::Future<Output = TaskResult> + Send + 'static,
{
    let handle = tokio::spawn(work);
    let result = match handle.await {
        Ok(result) => result,
        Err(e) => TaskResult::panicked(unit, &e),
    };

    if let Err(e) = tokio::fs::remove_file(&scratch_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(
                "Could not remove scratch file {}: {}",
                scratch_path.display(),
                e
            );
        }
    }

    result
}

/// Fetch one hour object and scan it through the filter.
async fn process_unit(
    fetcher: Arc<HourFetcher>,
    filter: Arc<FilterSpec>,
    scratch_path: PathBuf,
    unit: HourUnit,
) -> TaskResult {
    let bytes_fetched = match fetcher.fetch(unit, &scratch_path).await {
        Ok(bytes) => bytes,
        Err(e) => return TaskResult::failed(unit, UnitError::Fetch(format!("{:#}", e))),
    };

    // Decompression and parsing are CPU-bound, keep them off the runtime
    let scan_path = scratch_path.clone();
    let scan_filter = filter.clone();
    let scanned = tokio::task::spawn_blocking(move || scan_object(&scan_path, &scan_filter)).await;

    let outcome = match scanned {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            return TaskResult {
                unit,
                records: Vec::new(),
                stats: ScanStats::default(),
                bytes_fetched,
                error: Some(UnitError::Fetch(format!("reading fetched object: {}", e))),
            }
        }
        Err(e) => return TaskResult::panicked(unit, &e),
    };

    TaskResult {
        unit,
        records: outcome.records,
        stats: outcome.stats,
        bytes_fetched,
        error: outcome.truncated.map(UnitError::Truncated),
    }
}

/// Statistics from a scheduler run.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total hour units attempted
    pub total_hours: usize,

    /// Hours fully processed
    pub hours_completed: usize,

    /// Hours that failed permanently
    pub hours_failed: usize,

    /// Records that passed the filter
    pub records_matched: u64,

    /// Records persisted by the sink
    pub records_written: u64,

    /// Failed units with their reasons
    pub failures: Vec<(HourUnit, UnitError)>,
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Completed: {}, Failed: {}, Matched: {}, Written: {}, Total: {}",
            self.hours_completed,
            self.hours_failed,
            self.records_matched,
            self.records_written,
            self.total_hours
        )
    }
}
