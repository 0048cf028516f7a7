//! Resumable download of hourly archive objects.
//!
//! Two independent retry layers cooperate here. The inner layer covers the
//! request/status phase only and absorbs brief transport blips (connect
//! failures, 429 and 5xx) with exponential backoff. The outer layer retries
//! whole attempts with a fixed cooldown; because every attempt re-reads the
//! scratch file size and asks the server for the remainder, bytes already on
//! disk are never transferred twice.

use crate::config::ArchiveConfig;
use crate::hours::HourUnit;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Downloads one hour's remote object into a caller-owned scratch file.
pub struct HourFetcher {
    client: reqwest::Client,
    base_url: String,
    attempts: u32,
    cooldown: Duration,
    transport_attempts: usize,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl HourFetcher {
    /// Build a fetcher from the archive configuration.
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            attempts: config.fetch_attempts,
            cooldown: Duration::from_millis(config.cooldown_ms),
            transport_attempts: config.retry.max_retries,
            initial_backoff_ms: config.retry.initial_backoff_ms,
            max_backoff_ms: config.retry.max_backoff_ms,
        })
    }

    /// URL of the remote object for one hour unit.
    pub fn url_for(&self, unit: HourUnit) -> String {
        format!("{}/{}", self.base_url, unit.object_name())
    }

    /// Materialize the object for `unit` at `path`, resuming from whatever
    /// bytes are already there. Returns the object's size on disk.
    ///
    /// The scratch file is left in place on every outcome, partial bytes
    /// included; cleanup belongs to the caller.
    pub async fn fetch(&self, unit: HourUnit, path: &Path) -> Result<u64> {
        let url = self.url_for(unit);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_once(&url, path).await {
                Ok(len) => {
                    if attempt > 1 {
                        tracing::info!("Fetched {} on attempt {}", unit, attempt);
                    }
                    return Ok(len);
                }
                Err(e) => {
                    if attempt >= self.attempts {
                        return Err(e.context(format!(
                            "Giving up on {} after {} attempts",
                            unit, attempt
                        )));
                    }

                    tracing::warn!(
                        "Fetch attempt {} for {} failed: {}, retrying in {:?}",
                        attempt,
                        unit,
                        e,
                        self.cooldown
                    );
                    tokio::time::sleep(self.cooldown).await;
                }
            }
        }
    }

    /// One outer attempt: size the partial file, request the remainder,
    /// interpret the status, stream the body to disk.
    async fn fetch_once(&self, url: &str, path: &Path) -> Result<u64> {
        let offset = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let response = self.request_with_retry(url, offset).await?;

        match response.status() {
            // The requested range starts at or past the end of the object,
            // so the bytes on disk already cover all of it.
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(offset),
            StatusCode::OK => {
                // Server ignored the range request; rewrite from byte 0.
                let file = tokio::fs::File::create(path)
                    .await
                    .with_context(|| format!("creating scratch file {}", path.display()))?;
                write_body(response, file).await
            }
            StatusCode::PARTIAL_CONTENT => {
                let file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .await
                    .with_context(|| format!("opening scratch file {}", path.display()))?;
                let appended = write_body(response, file).await?;
                Ok(offset + appended)
            }
            other => anyhow::bail!("Unexpected status {} for {}", other, url),
        }
    }

    /// Request phase with transport-level retries. Connect failures and the
    /// retryable status set back off and resend; every other response is
    /// handed to the caller as-is. Body consumption is deliberately not
    /// covered: a mid-body failure costs one outer attempt, which then
    /// resumes from the bytes already written.
    async fn request_with_retry(&self, url: &str, offset: u64) -> Result<reqwest::Response> {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff_ms;

        loop {
            attempt += 1;

            let mut request = self.client.get(url);
            if offset > 0 {
                request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
            }

            let outcome = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if is_retryable_status(status) {
                        // Drain the body so the connection can be reused.
                        let _ = response.bytes().await;
                        Err(anyhow::anyhow!("retryable status {}", status))
                    } else {
                        Ok(response)
                    }
                }
                Err(e) => Err(anyhow::Error::new(e).context("sending request")),
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.transport_attempts {
                        return Err(e.context(format!(
                            "transport failed after {} attempts",
                            attempt
                        )));
                    }

                    tracing::debug!(
                        "Transport attempt {} for {} failed: {}, retrying in {}ms",
                        attempt,
                        url,
                        e,
                        backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(self.max_backoff_ms);
                }
            }
        }
    }
}

/// Statuses the transport layer retries on its own.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Stream a response body into an open file, returning the bytes written.
async fn write_body(mut response: reqwest::Response, mut file: tokio::fs::File) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.context("reading response body")? {
        file.write_all(&chunk)
            .await
            .context("writing scratch file")?;
        written += chunk.len() as u64;
    }
    file.flush().await.context("flushing scratch file")?;
    Ok(written)
}
