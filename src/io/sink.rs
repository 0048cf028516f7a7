//! Memory-bounded buffered persistence of matched records.
//!
//! Records accumulate in memory and are flushed in fixed-size batches, so
//! peak memory stays bounded no matter how large the time window is. The
//! destination extension selects the encoding: `.parquet` writes columnar
//! batches, anything else appends JSON lines.
//!
//! Columnar semantics: one Parquet writer stays open for the whole run and
//! every flush becomes one Snappy row group, so flushes within a run append
//! for real. The column schema is fixed by the first flushed batch; fields
//! outside it are dropped from later batches and missing fields are null.
//! Appending to a Parquet file left by an earlier run is not supported; the
//! destination is recreated. JSON-lines destinations append across runs.

use crate::filter::Record;
use anyhow::{Context, Result};
use arrow::datatypes::SchemaRef;
use arrow::json::reader::infer_json_schema_from_iterator;
use arrow::json::ReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Buffered single-writer sink for matched records.
///
/// Owned by exactly one point of control; it has no interior locking and
/// must never be shared across tasks.
pub struct EventSink {
    path: PathBuf,
    capacity: usize,
    buffer: Vec<Record>,
    encoder: Encoder,
    flush_count: u64,
    records_written: u64,
    closed: bool,
}

enum Encoder {
    Jsonl {
        writer: BufWriter<File>,
    },
    Parquet {
        /// Destination handle opened eagerly so an unwritable path fails
        /// the run before any fetching starts. Consumed on first flush.
        placeholder: Option<File>,
        stream: Option<ParquetStream>,
    },
}

struct ParquetStream {
    schema: SchemaRef,
    writer: ArrowWriter<File>,
}

impl EventSink {
    /// Open a sink at `path` with the given buffer capacity.
    pub fn create(path: &Path, capacity: usize) -> Result<Self> {
        let encoder = if is_parquet(path) {
            let file = File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            Encoder::Parquet {
                placeholder: Some(file),
                stream: None,
            }
        } else {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("opening output file {}", path.display()))?;
            Encoder::Jsonl {
                writer: BufWriter::new(file),
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            capacity,
            buffer: Vec::with_capacity(capacity.min(10_000)),
            encoder,
            flush_count: 0,
            records_written: 0,
            closed: false,
        })
    }

    /// Append one record to the buffer, flushing synchronously if the
    /// buffer has reached capacity.
    pub fn write(&mut self, record: Record) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Persist and clear the buffer. A no-op on an empty buffer.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match &mut self.encoder {
            Encoder::Jsonl { writer } => {
                for record in &self.buffer {
                    writer.write_all(record.as_str().as_bytes())?;
                    writer.write_all(b"\n")?;
                }
                writer.flush().context("flushing output file")?;
            }
            Encoder::Parquet {
                placeholder,
                stream,
            } => {
                flush_parquet(&self.buffer, placeholder, stream)?;
            }
        }

        self.records_written += self.buffer.len() as u64;
        self.flush_count += 1;
        tracing::debug!(
            "Flushed {} records to {} (total {})",
            self.buffer.len(),
            self.path.display(),
            self.records_written
        );
        self.buffer.clear();
        Ok(())
    }

    /// Flush the remainder and finalize the destination. Call once at the
    /// end of a run; later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;

        if let Encoder::Parquet {
            placeholder,
            stream,
        } = &mut self.encoder
        {
            if let Some(stream) = stream.as_mut() {
                stream
                    .writer
                    .finish()
                    .context("finalizing parquet output")?;
            } else if placeholder.take().is_some() {
                // Nothing ever matched; don't leave a zero-byte file that
                // no parquet reader can open.
                std::fs::remove_file(&self.path).ok();
                tracing::info!("No records matched, removed empty {}", self.path.display());
            }
        }
        Ok(())
    }

    /// Records currently buffered and not yet persisted.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of non-empty flushes so far.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// Records persisted so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// The destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                "Sink for {} dropped without close, flushing remainder",
                self.path.display()
            );
            if let Err(e) = self.close() {
                tracing::warn!("Final flush for {} failed: {}", self.path.display(), e);
            }
        }
    }
}

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"))
}

fn flush_parquet(
    buffer: &[Record],
    placeholder: &mut Option<File>,
    stream: &mut Option<ParquetStream>,
) -> Result<()> {
    // Buffered lines parsed cleanly during filtering, so this re-parse only
    // fails if the file raced with something else, which is propagated.
    let values: Vec<serde_json::Value> = buffer
        .iter()
        .map(|r| serde_json::from_str(r.as_str()))
        .collect::<Result<_, _>>()
        .context("re-parsing buffered record")?;

    if stream.is_none() {
        let schema = Arc::new(
            infer_json_schema_from_iterator(values.iter().map(Ok))
                .context("inferring parquet schema")?,
        );
        let file = match placeholder.take() {
            Some(file) => file,
            None => anyhow::bail!("parquet destination already finalized"),
        };
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .context("opening parquet writer")?;
        *stream = Some(ParquetStream { schema, writer });
    }

    let Some(stream) = stream.as_mut() else {
        anyhow::bail!("parquet stream missing after initialization");
    };

    let mut decoder = ReaderBuilder::new(stream.schema.clone())
        .build_decoder()
        .context("building record batch decoder")?;
    decoder
        .serialize(&values)
        .context("converting records to columnar batch")?;
    if let Some(batch) = decoder.flush().context("draining record batch")? {
        stream.writer.write(&batch).context("writing row group")?;
        // One row group per flush keeps appends real within a run.
        stream.writer.flush().context("closing row group")?;
    }
    Ok(())
}
