use async_trait::async_trait;
use cluster_signals::config::ClusterConfig;
use cluster_signals::services::{DedupSink, EventIngestor, IngestStats, SignalSink};
use cluster_signals::store::{InMemoryTtlStore, TtlStore};
use cluster_signals::{ClusterDetector, ClusterError, ClusterSignal};
use std::sync::Mutex;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const T0: i64 = 1_700_000_100_000;

#[derive(Default)]
struct CollectingSink {
    signals: Mutex<Vec<ClusterSignal>>,
}

#[async_trait]
impl SignalSink for CollectingSink {
    async fn deliver(&self, signal: &ClusterSignal) -> cluster_signals::Result<bool> {
        self.signals.lock().unwrap().push(signal.clone());
        Ok(true)
    }
}

struct FailingSink;

#[async_trait]
impl SignalSink for FailingSink {
    async fn deliver(&self, _signal: &ClusterSignal) -> cluster_signals::Result<bool> {
        Err(ClusterError::store_unavailable("webhook", "503"))
    }
}

fn event_line(chain: &str, token: &str, wallet: &str, trust: u32, ts: i64) -> String {
    format!(
        r#"{{"id":"{wallet}-{ts}","chain":"{chain}","walletAddress":"{wallet}","timestampMs":{ts},"tokenAddress":"{token}","side":"buy","txHash":"h","unifiedTrustScore":{trust}}}"#
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ingests_many_tokens_in_parallel() {
    let mut lines = Vec::new();
    for token in 0..10 {
        for wallet in 0..5 {
            lines.push(event_line(
                "solana",
                &format!("Mint{token}"),
                &format!("Wallet{wallet}"),
                80,
                T0 + wallet,
            ));
        }
    }
    let input = lines.join("\n");

    let store = InMemoryTtlStore::new();
    let ingestor = EventIngestor::new(
        ClusterDetector::new(store.clone()),
        CollectingSink::default(),
        ClusterConfig::default(),
    )
    .with_concurrency(8);

    let stats = assert_ok!(ingestor.run(input.as_bytes()).await);
    assert_eq!(stats.lines, 50);
    assert_eq!(stats.processed, 50);
    assert_eq!(stats.signals, 10);
    assert_eq!(stats.delivered, 10);

    let mut ids: Vec<String> = ingestor
        .sink()
        .signals
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);
}

#[tokio::test]
async fn dedup_sink_absorbs_repeat_emissions() {
    let store = InMemoryTtlStore::new();
    let sink = DedupSink::new(
        store.clone(),
        CollectingSink::default(),
        Duration::from_secs(3_600),
    );

    let signal = ClusterSignal {
        id: "cluster:base:0xabc:0".to_string(),
        kind: cluster_signals::domain::SignalKind::Cluster,
        chain: cluster_signals::Chain::Base,
        token_address: "0xabc".to_string(),
        token_symbol: None,
        window_minutes: 15,
        unique_traders: vec![],
        cluster_size: 3,
        avg_trust_score: 75,
        created_at_ms: T0,
    };

    assert!(assert_ok!(sink.deliver(&signal).await));
    assert!(!assert_ok!(sink.deliver(&signal).await));
    assert_eq!(sink.inner().signals.lock().unwrap().len(), 1);
    assert!(store
        .get("cluster:delivered:cluster:base:0xabc:0")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn sink_failure_counts_as_failed_event() {
    let input = ["a", "b", "c"]
        .iter()
        .enumerate()
        .map(|(i, w)| event_line("base", "0xTok", w, 90, T0 + i as i64))
        .collect::<Vec<_>>()
        .join("\n");

    let ingestor = EventIngestor::new(
        ClusterDetector::new(InMemoryTtlStore::new()),
        FailingSink,
        ClusterConfig::default(),
    );

    let stats = assert_ok!(ingestor.run(input.as_bytes()).await);
    assert_eq!(
        stats,
        IngestStats {
            lines: 3,
            processed: 2,
            signals: 0,
            delivered: 0,
            malformed: 0,
            failed: 1,
        }
    );
}

#[tokio::test]
async fn invalid_cluster_config_stops_ingest() {
    let ingestor = EventIngestor::new(
        ClusterDetector::new(InMemoryTtlStore::new()),
        CollectingSink::default(),
        ClusterConfig {
            cooldown_minutes: 0,
            ..Default::default()
        },
    );

    let err = assert_err!(ingestor.run(&b""[..]).await);
    assert!(matches!(err, ClusterError::ConfigInvalid(_)));
}
