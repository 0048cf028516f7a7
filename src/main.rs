//! GitHub Archive Sieve CLI
//!
//! Fetch hourly GitHub Archive dumps, filter them, and persist the matches.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gha_sieve::{build_runtime, hour_range, parse_timestamp, run_pipeline, Config, FilterConfig};

#[derive(Parser)]
#[command(name = "gha-sieve")]
#[command(about = "Filter GitHub Archive event dumps", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override the number of concurrent hour downloads
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a time window of archive hours
    Run {
        /// Start of the window, UTC (YYYY-MM-DD or YYYY-MM-DD-HH)
        #[arg(long)]
        start: String,

        /// End of the window, inclusive (defaults to the start; a bare
        /// date covers that whole day)
        #[arg(long)]
        end: Option<String>,

        /// Comma-separated repository names to keep (owner/name)
        #[arg(long, value_delimiter = ',')]
        repos: Vec<String>,

        /// Comma-separated event types to keep
        #[arg(long, value_delimiter = ',')]
        event_types: Vec<String>,

        /// Output path; a .parquet extension selects columnar output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ingest whole months into one Parquet file per month
    Backfill {
        /// First month to ingest (YYYY-MM)
        first: String,

        /// Last month, inclusive (defaults to the first)
        last: Option<String>,

        /// Directory for the per-month output files
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Re-ingest months whose output file already exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file (use - for stdout)
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    match cli.command {
        Commands::Run {
            start,
            end,
            repos,
            event_types,
            output,
        } => {
            run_command(cli.config, cli.workers, start, end, repos, event_types, output)?;
        }

        Commands::Backfill {
            first,
            last,
            output_dir,
            overwrite,
        } => {
            backfill_command(cli.config, cli.workers, first, last, output_dir, overwrite)?;
        }

        Commands::Validate => {
            validate_command(cli.config)?;
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

/// Load the config file, falling back to defaults when the default path is
/// absent. An explicitly named file must exist.
fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).with_context(|| format!("loading config {}", path.display()))
    } else if path == &PathBuf::from("config.yaml") {
        Ok(Config::default())
    } else {
        anyhow::bail!("Config file not found: {}", path.display())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_command(
    config_path: PathBuf,
    workers: Option<usize>,
    start: String,
    end: Option<String>,
    repos: Vec<String>,
    event_types: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(&config_path)?;

    // Apply overrides
    if let Some(w) = workers {
        config.processing.workers = w;
    }
    if let Some(path) = output {
        config.output.path = path;
    }
    if !repos.is_empty() || !event_types.is_empty() {
        let filter = config.filter.get_or_insert_with(FilterConfig::default);
        if !repos.is_empty() {
            filter.repos = Some(repos);
        }
        if !event_types.is_empty() {
            filter.event_types = Some(event_types);
        }
    }

    config.validate()?;

    let start_ts = parse_timestamp(&start)?;
    let end_ts = match end {
        Some(end) => parse_window_end(&end)?,
        None => parse_window_end(&start)?,
    };

    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async { run_pipeline(config, start_ts, end_ts).await })?;

    Ok(())
}

/// Parse a window endpoint, widening a bare date to the end of that day.
fn parse_window_end(s: &str) -> Result<DateTime<Utc>> {
    let ts = parse_timestamp(s)?;
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        Ok(ts + Duration::hours(23))
    } else {
        Ok(ts)
    }
}

/// The inclusive hour window covering one `YYYY-MM` month.
fn month_window(month: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (year, month_num) = month
        .split_once('-')
        .with_context(|| format!("Invalid month '{month}': use YYYY-MM"))?;
    let year: i32 = year
        .parse()
        .with_context(|| format!("Invalid year in '{month}'"))?;
    let month_num: u32 = month_num
        .parse()
        .with_context(|| format!("Invalid month number in '{month}'"))?;

    let first = NaiveDate::from_ymd_opt(year, month_num, 1)
        .with_context(|| format!("No such month: '{month}'"))?;
    let next_month = if month_num == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month_num + 1, 1)
    }
    .with_context(|| format!("No month after '{month}'"))?;
    let last = next_month
        .pred_opt()
        .with_context(|| format!("No last day in '{month}'"))?;

    let start = first
        .and_hms_opt(0, 0, 0)
        .context("month has no first hour")?
        .and_utc();
    let end = last
        .and_hms_opt(23, 0, 0)
        .context("month has no last hour")?
        .and_utc();
    Ok((start, end))
}

/// The months from `first` through `last`, inclusive. A last month before
/// the first yields an empty sequence, mirroring the hour window policy.
fn month_sequence(first: &str, last: &str) -> Result<Vec<String>> {
    let (first_start, _) = month_window(first)?;
    let (last_start, _) = month_window(last)?;

    let mut months = Vec::new();
    let mut current = first_start.date_naive();
    let stop = last_start.date_naive();
    while current <= stop {
        months.push(format!("{}-{:02}", current.year(), current.month()));
        current = match current.month() {
            12 => NaiveDate::from_ymd_opt(current.year() + 1, 1, 1),
            m => NaiveDate::from_ymd_opt(current.year(), m + 1, 1),
        }
        .context("month arithmetic out of range")?;
    }
    Ok(months)
}

fn backfill_command(
    config_path: PathBuf,
    workers: Option<usize>,
    first: String,
    last: Option<String>,
    output_dir: PathBuf,
    overwrite: bool,
) -> Result<()> {
    let mut base = load_config(&config_path)?;
    if let Some(w) = workers {
        base.processing.workers = w;
    }
    base.validate()?;

    let months = month_sequence(&first, last.as_deref().unwrap_or(&first))?;
    if months.is_empty() {
        tracing::warn!("No months between {} and {}", first, last.unwrap_or(first.clone()));
        return Ok(());
    }

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let runtime = build_runtime(base.processing.worker_threads)?;
    let failed = runtime.block_on(async {
        // Months run one at a time; each gets its own sink and file. A
        // month that errors out is recorded and the rest still run.
        let mut failed: Vec<String> = Vec::new();
        for month in &months {
            let (start, end) = month_window(month)?;
            let dest = output_dir.join(format!("gharchive-{month}.parquet"));

            if !overwrite && dest.exists() {
                tracing::info!("Skipping {}: {} already exists", month, dest.display());
                continue;
            }

            let mut config = base.clone();
            config.output.path = dest;

            tracing::info!(
                "Backfilling {} ({} hours)",
                month,
                hour_range(start, end).count()
            );
            match run_pipeline(config, start, end).await {
                Ok(stats) if stats.hours_failed > 0 => {
                    tracing::warn!(
                        "Backfill for {} finished with {} failed hours",
                        month,
                        stats.hours_failed
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Backfill for {} did not complete: {:#}", month, e);
                    failed.push(month.clone());
                }
            }
        }
        Ok::<_, anyhow::Error>(failed)
    })?;

    if !failed.is_empty() {
        tracing::warn!(
            "{} of {} months did not complete: {}",
            failed.len(),
            months.len(),
            failed.join(", ")
        );
    }

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# GitHub Archive Sieve Configuration

# === ARCHIVE: Where the hourly event dumps come from ===
archive:
  # Base URL publishing <YYYY-MM-DD-H>.json.gz objects
  base_url: "https://data.gharchive.org"

  # HTTP timeouts in seconds
  connect_timeout_secs: 30
  read_timeout_secs: 120

  # Download attempts per hour object; each attempt resumes from the
  # bytes already on disk
  fetch_attempts: 10

  # Fixed pause between download attempts, in milliseconds
  cooldown_ms: 2000

  # Retries within one attempt for connect errors, 429 and 5xx
  retry:
    max_retries: 5
    initial_backoff_ms: 100
    max_backoff_ms: 10000

# === OUTPUT: Where matching events are written ===
output:
  # Destination file; a .parquet extension selects columnar output,
  # anything else appends JSON lines
  path: "filtered.jsonl"

  # Records held in memory before a flush is forced
  buffer_capacity: 10000

# === PROCESSING: Concurrency and reporting ===
processing:
  # Concurrent hour downloads (capped at 4)
  workers: 4

  # Tokio worker threads (null = num CPUs)
  # worker_threads: 8

  # Print throughput metrics while running
  enable_metrics: true

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # Base directory for in-progress downloads (default: system temp)
  # scratch_dir: "/tmp/gha-sieve"

  # Save a metrics JSON snapshot after the run completes
  # metrics_output_path: "metrics.json"

# === FILTER: Which events to keep (optional) ===
# Omit the section entirely to keep every parseable event.

# filter:
#   # Full repository names, exact match
#   repos:
#     - "apache/spark"
#     - "rust-lang/rust"
#
#   # Event types, exact match
#   event_types:
#     - "PushEvent"
#     - "PullRequestEvent"
"#;

    if output.as_os_str() == "-" {
        print!("{yaml}");
    } else {
        std::fs::write(&output, yaml)?;
        println!("Generated sample configuration at: {}", output.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_splits_comma_lists() {
        let cli = Cli::try_parse_from([
            "gha-sieve",
            "run",
            "--start",
            "2024-03-01",
            "--end",
            "2024-03-02",
            "--repos",
            "apache/spark,rust-lang/rust",
            "--event-types",
            "PushEvent",
        ])
        .unwrap();

        let Commands::Run {
            repos, event_types, ..
        } = cli.command
        else {
            panic!("expected run command");
        };
        assert_eq!(repos, vec!["apache/spark", "rust-lang/rust"]);
        assert_eq!(event_types, vec!["PushEvent"]);
    }

    #[test]
    fn test_cli_run_requires_start() {
        let cli = Cli::try_parse_from(["gha-sieve", "run"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_parse_backfill() {
        let cli = Cli::try_parse_from([
            "gha-sieve",
            "backfill",
            "2024-01",
            "2024-03",
            "--output-dir",
            "/tmp/archive",
        ])
        .unwrap();
        let Commands::Backfill { overwrite, .. } = cli.command else {
            panic!("expected backfill command");
        };
        assert!(!overwrite, "existing outputs are kept unless --overwrite");

        let cli = Cli::try_parse_from(["gha-sieve", "backfill", "2024-01", "--overwrite"]).unwrap();
        let Commands::Backfill { overwrite, .. } = cli.command else {
            panic!("expected backfill command");
        };
        assert!(overwrite);
    }

    /// Minimal config pointing at an unroutable port, with retries tuned
    /// down so a test that does reach the network fails fast.
    fn fast_config_file(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("config.yaml");
        let yaml = r#"
archive:
  base_url: "http://127.0.0.1:1"
  fetch_attempts: 1
  cooldown_ms: 1
  retry:
    max_retries: 1
    initial_backoff_ms: 1
    max_backoff_ms: 1
"#;
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_backfill_skips_existing_output_by_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = fast_config_file(dir.path());
        let out_dir = dir.path().join("months");
        std::fs::create_dir_all(&out_dir).unwrap();

        let done = out_dir.join("gharchive-2024-01.parquet");
        std::fs::write(&done, b"already ingested").unwrap();

        backfill_command(config_path, None, "2024-01".into(), None, out_dir, false).unwrap();

        assert_eq!(std::fs::read(&done).unwrap(), b"already ingested");
    }

    #[test]
    fn test_backfill_continues_past_failed_month() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = fast_config_file(dir.path());

        // A directory at each destination makes sink creation fail for
        // that month before any fetching starts.
        let out_dir = dir.path().join("months");
        std::fs::create_dir_all(out_dir.join("gharchive-2024-01.parquet")).unwrap();
        std::fs::create_dir_all(out_dir.join("gharchive-2024-02.parquet")).unwrap();

        let result = backfill_command(
            config_path,
            None,
            "2024-01".into(),
            Some("2024-02".into()),
            out_dir,
            true,
        );

        assert!(result.is_ok(), "per-month faults do not abort the driver");
    }

    #[test]
    fn test_month_sequence_spans_year_boundary() {
        let months = month_sequence("2023-11", "2024-02").unwrap();
        assert_eq!(months, vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn test_month_sequence_single_month() {
        assert_eq!(month_sequence("2024-06", "2024-06").unwrap(), vec!["2024-06"]);
    }

    #[test]
    fn test_month_sequence_backwards_is_empty() {
        assert!(month_sequence("2024-03", "2024-01").unwrap().is_empty());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["gha-sieve", "validate", "-c", "test.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_parse_window_end_widens_bare_date() {
        let end = parse_window_end("2024-03-01").unwrap();
        assert_eq!(end, parse_timestamp("2024-03-01-23").unwrap());

        let exact = parse_window_end("2024-03-01-5").unwrap();
        assert_eq!(exact, parse_timestamp("2024-03-01-5").unwrap());
    }

    #[test]
    fn test_month_window_january() {
        let (start, end) = month_window("2024-01").unwrap();
        assert_eq!(hour_range(start, end).count(), 31 * 24);
    }

    #[test]
    fn test_month_window_leap_february() {
        let (start, end) = month_window("2024-02").unwrap();
        assert_eq!(hour_range(start, end).count(), 29 * 24);
    }

    #[test]
    fn test_month_window_december_rolls_over() {
        let (start, end) = month_window("2023-12").unwrap();
        assert_eq!(start, parse_timestamp("2023-12-01").unwrap());
        assert_eq!(end, parse_timestamp("2023-12-31-23").unwrap());
    }

    #[test]
    fn test_month_window_rejects_garbage() {
        assert!(month_window("2024").is_err());
        assert!(month_window("2024-13").is_err());
        assert!(month_window("march").is_err());
    }
}
