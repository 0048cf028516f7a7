//! Configuration for the archive ingestion pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for an ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote archive configuration
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Optional filter to limit which events are kept
    #[serde(default)]
    pub filter: Option<FilterConfig>,
}

/// Remote archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL of the archive host publishing hourly `.json.gz` objects
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// HTTP read timeout in seconds (per socket read, not per download)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Attempt ceiling for a single hourly object; each attempt resumes
    /// from the bytes already on disk
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,

    /// Fixed cooldown between fetch attempts in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Transport-level retry configuration (connect errors, 429 and 5xx)
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            fetch_attempts: default_fetch_attempts(),
            cooldown_ms: default_cooldown_ms(),
            retry: RetryConfig::default(),
        }
    }
}

/// Output sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination file path. A `.parquet` extension selects the columnar
    /// encoding; any other extension appends JSON lines.
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    /// Records buffered in memory before a flush is forced
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Requested number of concurrent hour workers. Clamped to the pool
    /// ceiling at scheduler construction.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable periodic metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Base directory for in-progress scratch downloads; each run creates
    /// its own subdirectory here. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Optional path to save metrics JSON after the run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            scratch_dir: None,
            metrics_output_path: None,
        }
    }
}

/// Retry configuration for transient transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// Filter configuration to limit which archive events are kept.
/// If not specified, every event in the window is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Repository names to keep (`owner/name` form).
    /// If empty or not specified, all repositories pass.
    #[serde(default)]
    pub repos: Option<Vec<String>>,

    /// Event types to keep (e.g. `PushEvent`, `IssuesEvent`).
    /// If empty or not specified, all event types pass.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig::default(),
            output: OutputConfig::default(),
            processing: ProcessingConfig::default(),
            filter: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.archive.base_url.is_empty() {
            anyhow::bail!("Archive base URL must not be empty");
        }
        if !self.archive.base_url.starts_with("http://")
            && !self.archive.base_url.starts_with("https://")
        {
            anyhow::bail!("Archive base URL must be an http(s) URL");
        }
        if self.archive.fetch_attempts == 0 {
            anyhow::bail!("Fetch attempt ceiling must be > 0");
        }
        if self.output.buffer_capacity == 0 {
            anyhow::bail!("Sink buffer capacity must be > 0");
        }
        if self.output.path.as_os_str().is_empty() {
            anyhow::bail!("Output path must not be empty");
        }
        if self.processing.workers == 0 {
            anyhow::bail!("Workers must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_base_url() -> String { "https://data.gharchive.org".to_string() }
fn default_connect_timeout() -> u64 { 30 }
fn default_read_timeout() -> u64 { 120 }
fn default_fetch_attempts() -> u32 { 10 }
fn default_cooldown_ms() -> u64 { 2000 }
fn default_output_path() -> PathBuf { PathBuf::from("filtered.jsonl") }
fn default_buffer_capacity() -> usize { 10_000 }
fn default_workers() -> usize { 4 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
fn default_max_retries() -> usize { 5 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 10000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.archive.base_url, "https://data.gharchive.org");
        assert_eq!(config.archive.fetch_attempts, 10);
        assert_eq!(config.archive.cooldown_ms, 2000);
        assert_eq!(config.archive.retry.max_retries, 5);
        assert_eq!(config.output.path, PathBuf::from("filtered.jsonl"));
        assert_eq!(config.output.buffer_capacity, 10_000);
        assert_eq!(config.processing.workers, 4);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.archive.base_url, "https://data.gharchive.org");
        assert_eq!(config.output.buffer_capacity, 10_000);
    }

    #[test]
    fn test_config_validation_ok() {
        let config = Config {
            archive: ArchiveConfig::default(),
            output: OutputConfig {
                path: PathBuf::from("/tmp/events.parquet"),
                buffer_capacity: 500,
            },
            processing: ProcessingConfig::default(),
            filter: Some(FilterConfig {
                repos: Some(vec!["apache/spark".to_string()]),
                event_types: None,
            }),
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_url() {
        let config = Config {
            archive: ArchiveConfig {
                base_url: "ftp://archive.example.com".to_string(),
                ..ArchiveConfig::default()
            },
            output: OutputConfig::default(),
            processing: ProcessingConfig::default(),
            filter: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_workers() {
        let config = Config {
            archive: ArchiveConfig::default(),
            output: OutputConfig::default(),
            processing: ProcessingConfig {
                workers: 0,
                ..ProcessingConfig::default()
            },
            filter: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_section_roundtrip() {
        let yaml = r#"
filter:
  repos:
    - apache/spark
    - kubernetes/kubernetes
  event_types:
    - PushEvent
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let filter = config.filter.unwrap();
        assert_eq!(filter.repos.unwrap().len(), 2);
        assert_eq!(filter.event_types.unwrap(), vec!["PushEvent".to_string()]);
    }
}
