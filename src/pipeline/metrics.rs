//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for the ingest pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total bytes downloaded from the archive
    pub bytes_fetched: AtomicU64,

    /// Number of hour objects fully processed
    pub hours_completed: AtomicU64,

    /// Number of hour objects that failed permanently
    pub hours_failed: AtomicU64,

    /// Lines pulled out of decompressed hour objects
    pub lines_scanned: AtomicU64,

    /// Lines that decoded as JSON
    pub lines_parsed: AtomicU64,

    /// Lines skipped as undecodable
    pub lines_dropped: AtomicU64,

    /// Records that passed the filter
    pub records_matched: AtomicU64,

    /// Records handed to the sink
    pub records_written: AtomicU64,

    /// Sink flushes performed
    pub sink_flushes: AtomicU64,

    /// Start time
    start_time: Option<Instant>,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bytes_fetched: AtomicU64::new(0),
            hours_completed: AtomicU64::new(0),
            hours_failed: AtomicU64::new(0),
            lines_scanned: AtomicU64::new(0),
            lines_parsed: AtomicU64::new(0),
            lines_dropped: AtomicU64::new(0),
            records_matched: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            sink_flushes: AtomicU64::new(0),
            start_time: Some(Instant::now()),
        })
    }

    /// Record bytes downloaded.
    pub fn add_bytes_fetched(&self, bytes: u64) {
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a completed hour.
    pub fn add_hour_completed(&self) {
        self.hours_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a permanently failed hour.
    pub fn add_hour_failed(&self) {
        self.hours_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record scanned lines.
    pub fn add_lines_scanned(&self, count: u64) {
        self.lines_scanned.fetch_add(count, Ordering::Relaxed);
    }

    /// Record successfully parsed lines.
    pub fn add_lines_parsed(&self, count: u64) {
        self.lines_parsed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record dropped lines.
    pub fn add_lines_dropped(&self, count: u64) {
        self.lines_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record filter matches.
    pub fn add_records_matched(&self, count: u64) {
        self.records_matched.fetch_add(count, Ordering::Relaxed);
    }

    /// Record records handed to the sink.
    pub fn add_records_written(&self, count: u64) {
        self.records_written.fetch_add(count, Ordering::Relaxed);
    }

    /// Set the current sink flush count.
    pub fn set_sink_flushes(&self, count: u64) {
        self.sink_flushes.store(count, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get download throughput in MB/s.
    pub fn fetch_throughput_mbps(&self) -> f64 {
        let bytes = self.bytes_fetched.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (bytes as f64) / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        }
    }

    /// Get hours per second.
    pub fn hours_per_second(&self) -> f64 {
        let hours = self.hours_completed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            hours as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get scanned lines per second.
    pub fn lines_per_second(&self) -> f64 {
        let lines = self.lines_scanned.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            lines as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            hours_completed: self.hours_completed.load(Ordering::Relaxed),
            hours_failed: self.hours_failed.load(Ordering::Relaxed),
            lines_scanned: self.lines_scanned.load(Ordering::Relaxed),
            lines_parsed: self.lines_parsed.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            records_matched: self.records_matched.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            sink_flushes: self.sink_flushes.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            fetch_throughput_mbps: self.fetch_throughput_mbps(),
            hours_per_second: self.hours_per_second(),
            lines_per_second: self.lines_per_second(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub bytes_fetched: u64,
    pub hours_completed: u64,
    pub hours_failed: u64,
    pub lines_scanned: u64,
    pub lines_parsed: u64,
    pub lines_dropped: u64,
    pub records_matched: u64,
    pub records_written: u64,
    pub sink_flushes: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub fetch_throughput_mbps: f64,
    pub hours_per_second: f64,
    pub lines_per_second: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Fraction of parsed records that matched, as a percentage.
    pub fn match_rate(&self) -> f64 {
        if self.lines_parsed > 0 {
            self.records_matched as f64 / self.lines_parsed as f64 * 100.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Hours: {} done, {} failed | Lines: {} scanned, {} dropped | \
             Matched: {} ({:.2}%) | Written: {} | \
             Fetched: {:.1} MB @ {:.2} MB/s | \
             Rate: {:.0} lines/s | Elapsed: {:.1}s",
            self.hours_completed,
            self.hours_failed,
            self.lines_scanned,
            self.lines_dropped,
            self.records_matched,
            self.match_rate(),
            self.records_written,
            self.bytes_fetched as f64 / (1024.0 * 1024.0),
            self.fetch_throughput_mbps,
            self.lines_per_second,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_hours: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_hours: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_hours,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_hours > 0 {
                        (snapshot.hours_completed + snapshot.hours_failed) as f64
                            / self.total_hours as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!(
                        "[{:.1}%] {}",
                        progress,
                        snapshot
                    );
                }
                _ = shutdown.recv() => {
                    // Final report
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Ingest Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Hours completed: {}", snapshot.hours_completed);
        println!("Hours failed: {}", snapshot.hours_failed);
        println!("Lines scanned: {}", snapshot.lines_scanned);
        println!("Lines dropped: {}", snapshot.lines_dropped);
        println!(
            "Records matched: {} ({:.2}% of parsed)",
            snapshot.records_matched,
            snapshot.match_rate()
        );
        println!("Records written: {}", snapshot.records_written);
        println!("Sink flushes: {}", snapshot.sink_flushes);
        println!(
            "Data fetched: {:.2} MB",
            snapshot.bytes_fetched as f64 / (1024.0 * 1024.0)
        );
        println!(
            "Fetch throughput: {:.2} MB/s",
            snapshot.fetch_throughput_mbps
        );
        println!("Scan rate: {:.0} lines/s", snapshot.lines_per_second);
        println!("======================\n");
    }
}
