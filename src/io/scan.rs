//! Streaming scan of fetched archive objects.
//!
//! Decompresses one gzip JSON-lines object and yields the records passing
//! the filter, one line at a time, without materializing the decompressed
//! object. Lines that cannot contain a match are discarded by a substring
//! pre-check before any JSON parsing happens.

use crate::filter::{decode_line, FilterSpec, Record};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Line counters for one scanned object.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    /// Lines seen in the decompressed stream.
    pub lines_scanned: u64,
    /// Lines that survived the pre-check and parsed cleanly.
    pub lines_parsed: u64,
    /// Lines dropped as undecodable (bad UTF-8 or malformed JSON).
    pub lines_dropped: u64,
}

/// Result of scanning one object.
///
/// A corrupt or truncated stream is not fatal: `records` holds everything
/// decoded before the corruption point and `truncated` carries the read
/// error for per-unit reporting.
#[derive(Debug)]
pub struct ScanOutcome {
    pub records: Vec<Record>,
    pub stats: ScanStats,
    pub truncated: Option<String>,
}

/// Scan a completed scratch file.
pub fn scan_object(path: &Path, filter: &FilterSpec) -> std::io::Result<ScanOutcome> {
    let file = File::open(path)?;
    Ok(scan_stream(file, filter))
}

/// Scan a gzip JSON-lines stream, collecting the records that pass
/// `filter`. The stream is consumed exactly once.
pub fn scan_stream<R: Read>(input: R, filter: &FilterSpec) -> ScanOutcome {
    let mut reader = BufReader::new(MultiGzDecoder::new(input));
    let mut records = Vec::new();
    let mut stats = ScanStats::default();
    let mut truncated = None;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                trim_line_ending(&mut buf);
                if buf.is_empty() {
                    continue;
                }
                stats.lines_scanned += 1;

                let Ok(line) = std::str::from_utf8(&buf) else {
                    stats.lines_dropped += 1;
                    continue;
                };

                if !filter.fast_check(line) {
                    continue;
                }

                match decode_line(line) {
                    Ok(fields) => {
                        stats.lines_parsed += 1;
                        if filter.passes_fields(&fields) {
                            records.push(Record::new(line.to_string()));
                        }
                    }
                    Err(e) => {
                        stats.lines_dropped += 1;
                        tracing::debug!("Dropping undecodable line: {}", e);
                    }
                }
            }
            Err(e) => {
                // Keep what decoded so far; the unit reports a non-fatal
                // read error instead of failing the run.
                truncated = Some(e.to_string());
                break;
            }
        }
    }

    ScanOutcome {
        records,
        stats,
        truncated,
    }
}

fn trim_line_ending(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
}
