use serde::{Deserialize, Serialize};

use crate::cluster::keys::normalize_address;

/// A wallet that contributed a qualifying buy to a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketWallet {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_score: Option<f64>,
    pub added_at: i64,
}

/// Distinct buyers of one token within one window, as held in the TTL store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBucket {
    #[serde(default)]
    pub wallets: Vec<BucketWallet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
}

impl ClusterBucket {
    /// Empty bucket capturing the symbol of its first contributing event
    pub fn new(token_symbol: Option<String>) -> Self {
        Self {
            wallets: Vec::new(),
            token_symbol,
        }
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        let needle = normalize_address(address);
        self.wallets
            .iter()
            .any(|w| normalize_address(&w.address) == needle)
    }

    /// Append a wallet unless its normalized address is already present.
    ///
    /// Returns `false` for a repeat contribution. The first-seen trust score is
    /// kept for the lifetime of the bucket.
    pub fn add_wallet(&mut self, wallet: BucketWallet) -> bool {
        if self.contains(&wallet.address) {
            return false;
        }
        self.wallets.push(wallet);
        true
    }

    /// Mean trust score rounded half-up, missing scores counted as zero
    pub fn avg_trust_score(&self) -> i64 {
        if self.wallets.is_empty() {
            return 0;
        }
        let sum: f64 = self
            .wallets
            .iter()
            .map(|w| w.trust_score.unwrap_or(0.0))
            .sum();
        let mean = sum / self.wallets.len() as f64;
        (mean + 0.5).floor() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(address: &str, trust: Option<f64>) -> BucketWallet {
        BucketWallet {
            address: address.to_string(),
            trader_id: None,
            trust_score: trust,
            added_at: 0,
        }
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let mut bucket = ClusterBucket::new(Some("TKN".into()));
        assert!(bucket.add_wallet(wallet("0xAbC", Some(70.0))));
        assert!(!bucket.add_wallet(wallet("0xabc", Some(99.0))));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.wallets[0].trust_score, Some(70.0));
    }

    #[test]
    fn test_avg_trust_score_rounding() {
        let mut bucket = ClusterBucket::default();
        assert_eq!(bucket.avg_trust_score(), 0);

        bucket.add_wallet(wallet("a", Some(70.0)));
        bucket.add_wallet(wallet("b", Some(71.0)));
        // 70.5 rounds up
        assert_eq!(bucket.avg_trust_score(), 71);

        bucket.add_wallet(wallet("c", None));
        // (70 + 71 + 0) / 3 = 47.0
        assert_eq!(bucket.avg_trust_score(), 47);
    }

    #[test]
    fn test_store_format() {
        let mut bucket = ClusterBucket::new(Some("TKN".into()));
        bucket.add_wallet(BucketWallet {
            address: "w1".into(),
            trader_id: Some("trader-9".into()),
            trust_score: Some(80.0),
            added_at: 1_700_000_000_000,
        });

        let json = serde_json::to_value(&bucket).unwrap();
        assert_eq!(json["tokenSymbol"], "TKN");
        assert_eq!(json["wallets"][0]["traderId"], "trader-9");
        assert_eq!(json["wallets"][0]["addedAt"], 1_700_000_000_000i64);
    }
}
