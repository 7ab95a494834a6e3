use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bucket::{BucketWallet, ClusterBucket};
use super::event::Chain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Cluster,
}

/// A contributing wallet as reported in a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueTrader {
    pub wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_score: Option<f64>,
}

impl From<&BucketWallet> for UniqueTrader {
    fn from(wallet: &BucketWallet) -> Self {
        Self {
            wallet_address: wallet.address.clone(),
            trader_id: wallet.trader_id.clone(),
            trust_score: wallet.trust_score,
        }
    }
}

/// Emitted when enough distinct trusted wallets bought one token in one window.
///
/// Consumers must treat it as a candidate and deduplicate by `id` before
/// notifying anyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSignal {
    pub id: String,
    pub kind: SignalKind,
    pub chain: Chain,
    pub token_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    pub window_minutes: u64,
    pub unique_traders: Vec<UniqueTrader>,
    pub cluster_size: usize,
    pub avg_trust_score: i64,
    pub created_at_ms: i64,
}

impl ClusterSignal {
    pub fn from_bucket(
        id: String,
        chain: Chain,
        token_address: &str,
        window_minutes: u64,
        bucket: &ClusterBucket,
        created_at_ms: i64,
    ) -> Self {
        Self {
            id,
            kind: SignalKind::Cluster,
            chain,
            token_address: token_address.to_string(),
            token_symbol: bucket.token_symbol.clone(),
            window_minutes,
            unique_traders: bucket.wallets.iter().map(UniqueTrader::from).collect(),
            cluster_size: bucket.len(),
            avg_trust_score: bucket.avg_trust_score(),
            created_at_ms,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at_ms)
    }
}
