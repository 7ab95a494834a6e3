//! Signal sinks
//!
//! A returned [`ClusterSignal`] is only a candidate: under contention the
//! engine may emit the same id twice. [`DedupSink`] filters repeats by id
//! before anything downstream sees them.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cluster::keys::delivered_key;
use crate::domain::ClusterSignal;
use crate::error::Result;
use crate::store::TtlStore;

/// Downstream consumer of emitted signals
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Returns `false` when the signal was intentionally dropped
    async fn deliver(&self, signal: &ClusterSignal) -> Result<bool>;
}

/// Writes each signal as one JSON object per line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> SignalSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, signal: &ClusterSignal) -> Result<bool> {
        let mut line = serde_json::to_vec(signal)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(true)
    }
}

/// Forwards each signal id at most once per `ttl`, claimed through the store.
///
/// The claim is taken before forwarding; if the inner sink then fails the id
/// stays claimed and that signal is not retried.
pub struct DedupSink<S, K> {
    store: S,
    inner: K,
    ttl: Duration,
}

impl<S, K> DedupSink<S, K>
where
    S: TtlStore,
    K: SignalSink,
{
    pub fn new(store: S, inner: K, ttl: Duration) -> Self {
        Self { store, inner, ttl }
    }

    pub fn inner(&self) -> &K {
        &self.inner
    }
}

#[async_trait]
impl<S, K> SignalSink for DedupSink<S, K>
where
    S: TtlStore,
    K: SignalSink,
{
    async fn deliver(&self, signal: &ClusterSignal) -> Result<bool> {
        let claimed = self
            .store
            .set_if_absent(
                &delivered_key(&signal.id),
                signal.created_at_ms.to_string(),
                self.ttl,
            )
            .await?;

        if !claimed {
            debug!(signal_id = %signal.id, "duplicate signal dropped");
            return Ok(false);
        }

        self.inner.deliver(signal).await
    }
}

#[async_trait]
impl<K: SignalSink + ?Sized> SignalSink for Box<K> {
    async fn deliver(&self, signal: &ClusterSignal) -> Result<bool> {
        (**self).deliver(signal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chain, SignalKind};
    use crate::store::InMemoryTtlStore;

    fn signal(id: &str) -> ClusterSignal {
        ClusterSignal {
            id: id.to_string(),
            kind: SignalKind::Cluster,
            chain: Chain::Solana,
            token_address: "Mint111".to_string(),
            token_symbol: None,
            window_minutes: 15,
            unique_traders: vec![],
            cluster_size: 3,
            avg_trust_score: 80,
            created_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_json_lines_sink_writes_one_line_per_signal() {
        let sink = JsonLinesSink::new(Vec::new());
        assert!(sink.deliver(&signal("s1")).await.unwrap());
        assert!(sink.deliver(&signal("s2")).await.unwrap());

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let decoded: ClusterSignal = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(decoded.id, "s2");
    }

    #[tokio::test]
    async fn test_dedup_sink_drops_repeated_ids() {
        let sink = DedupSink::new(
            InMemoryTtlStore::new(),
            JsonLinesSink::new(Vec::new()),
            Duration::from_secs(60),
        );

        assert!(sink.deliver(&signal("s1")).await.unwrap());
        assert!(!sink.deliver(&signal("s1")).await.unwrap());
        assert!(sink.deliver(&signal("s2")).await.unwrap());

        let written = sink.inner().writer.lock().await.clone();
        assert_eq!(String::from_utf8(written).unwrap().lines().count(), 2);
    }
}
