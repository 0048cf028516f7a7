//! I/O operations for archive fetching, stream scanning, and output writing.

mod fetch;
mod scan;
mod sink;

pub use fetch::HourFetcher;
pub use scan::{scan_object, scan_stream, ScanOutcome, ScanStats};
pub use sink::EventSink;
