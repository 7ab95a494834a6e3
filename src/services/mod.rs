pub mod ingest;
pub mod sink;

pub use ingest::{EventIngestor, IngestStats};
pub use sink::{DedupSink, JsonLinesSink, SignalSink};
