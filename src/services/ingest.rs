//! JSON-lines event ingestion
//!
//! Feeds newline-delimited [`TradeEvent`]s through a [`ClusterDetector`] with
//! bounded parallelism and hands emitted signals to a [`SignalSink`]. Failed
//! events are logged and counted; retrying them is left to whoever produced
//! the input.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

use super::sink::SignalSink;
use crate::cluster::ClusterDetector;
use crate::config::ClusterConfig;
use crate::domain::TradeEvent;
use crate::error::{ClusterError, Result};
use crate::store::TtlStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Non-blank input lines
    pub lines: u64,
    /// Events the detector finished with, signal or not
    pub processed: u64,
    pub signals: u64,
    /// Signals the sink accepted (after dedup)
    pub delivered: u64,
    pub malformed: u64,
    /// Events left unprocessed by a store or sink failure
    pub failed: u64,
}

#[derive(Debug)]
enum LineOutcome {
    Blank,
    Malformed,
    Processed,
    Signal { delivered: bool },
    Failed,
    Read(std::io::Error),
}

impl IngestStats {
    fn record(&mut self, outcome: &LineOutcome) {
        match outcome {
            LineOutcome::Blank | LineOutcome::Read(_) => return,
            LineOutcome::Malformed => self.malformed += 1,
            LineOutcome::Processed => self.processed += 1,
            LineOutcome::Signal { delivered } => {
                self.processed += 1;
                self.signals += 1;
                if *delivered {
                    self.delivered += 1;
                }
            }
            LineOutcome::Failed => self.failed += 1,
        }
        self.lines += 1;
    }
}

pub struct EventIngestor<S, K> {
    detector: ClusterDetector<S>,
    sink: K,
    cluster: ClusterConfig,
    concurrency: usize,
}

impl<S, K> EventIngestor<S, K>
where
    S: TtlStore,
    K: SignalSink,
{
    pub fn new(detector: ClusterDetector<S>, sink: K, cluster: ClusterConfig) -> Self {
        Self {
            detector,
            sink,
            cluster,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn detector(&self) -> &ClusterDetector<S> {
        &self.detector
    }

    /// Consume `reader` to EOF. A read error stops intake and is returned once
    /// in-flight events have finished.
    pub async fn run<R>(&self, reader: R) -> Result<IngestStats>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        self.cluster.validate()?;

        let lines = stream::unfold(Some(reader.lines()), |state| async move {
            let mut lines = state?;
            match lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(lines))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        });

        let outcomes = lines
            .map(|line| async move {
                match line {
                    Ok(line) => self.process_line(&line).await,
                    Err(e) => LineOutcome::Read(e),
                }
            })
            .buffer_unordered(self.concurrency);
        futures::pin_mut!(outcomes);

        let mut stats = IngestStats::default();
        let mut read_error = None;
        while let Some(outcome) = outcomes.next().await {
            stats.record(&outcome);
            if let LineOutcome::Read(e) = outcome {
                read_error = Some(e);
            }
        }

        info!(
            "Ingest finished: {} lines, {} processed, {} signals ({} delivered), {} malformed, {} failed",
            stats.lines, stats.processed, stats.signals, stats.delivered, stats.malformed, stats.failed
        );

        match read_error {
            Some(e) => Err(ClusterError::Io(e)),
            None => Ok(stats),
        }
    }

    async fn process_line(&self, line: &str) -> LineOutcome {
        let line = line.trim();
        if line.is_empty() {
            return LineOutcome::Blank;
        }

        let event: TradeEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping unparseable event line: {}", e);
                return LineOutcome::Malformed;
            }
        };

        match self.detector.process_trade_event(&event, &self.cluster).await {
            Ok(Some(signal)) => match self.sink.deliver(&signal).await {
                Ok(delivered) => {
                    debug!(
                        signal_id = %signal.id,
                        created_at = ?signal.created_at(),
                        delivered,
                        "Signal handed to sink"
                    );
                    LineOutcome::Signal { delivered }
                }
                Err(e) => {
                    error!(signal_id = %signal.id, "Signal delivery failed: {}", e);
                    LineOutcome::Failed
                }
            },
            Ok(None) => LineOutcome::Processed,
            Err(ClusterError::MalformedEvent(reason)) => {
                warn!(event_id = %event.id, "Skipping malformed event: {}", reason);
                LineOutcome::Malformed
            }
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    retryable = e.is_retryable(),
                    "Event not processed: {}",
                    e
                );
                LineOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sink::JsonLinesSink;
    use crate::store::InMemoryTtlStore;

    fn line(wallet: &str, trust: u32, ts: i64) -> String {
        format!(
            r#"{{"id":"{wallet}-{ts}","chain":"solana","walletAddress":"{wallet}","timestampMs":{ts},"tokenAddress":"Mint111","tokenSymbol":"BONK","side":"buy","txHash":"sig-{wallet}","unifiedTrustScore":{trust}}}"#
        )
    }

    #[tokio::test]
    async fn test_counts_every_kind_of_line() {
        let t0 = 1_700_000_100_000;
        let input = [
            line("w1", 80, t0),
            String::new(),
            "not json".to_string(),
            line("w2", 20, t0 + 1),
            line("w2", 90, t0 + 2),
            line("", 90, t0 + 3),
            line("w3", 70, t0 + 4),
        ]
        .join("\n");

        let detector = ClusterDetector::new(InMemoryTtlStore::new());
        let ingestor = EventIngestor::new(
            detector,
            JsonLinesSink::new(Vec::new()),
            ClusterConfig::default(),
        );

        let stats = ingestor.run(input.as_bytes()).await.unwrap();
        assert_eq!(
            stats,
            IngestStats {
                lines: 6,
                processed: 4,
                signals: 1,
                delivered: 1,
                malformed: 2,
                failed: 0,
            }
        );
    }
}
