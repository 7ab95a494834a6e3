use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClusterError, Result};

/// Chains the upstream normalizers emit events for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Base,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Base => "base",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Chain {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "solana" => Ok(Chain::Solana),
            "base" => Ok(Chain::Base),
            _ => Err(format!("Unknown chain: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

/// One normalized trade, with the wallet's trust score attached upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub id: String,
    pub chain: Chain,
    pub wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trader_id: Option<String>,
    pub timestamp_ms: i64,
    pub token_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    pub side: TradeSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_usd: Option<f64>,
    #[serde(default)]
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unified_trust_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unified_trust_tier: Option<String>,
}

impl TradeEvent {
    pub fn is_buy(&self) -> bool {
        self.side == TradeSide::Buy
    }

    /// Trust score with a missing value counted as zero
    pub fn trust_score_or_zero(&self) -> f64 {
        self.unified_trust_score.unwrap_or(0.0)
    }

    /// Fail fast on fields that would otherwise produce malformed store keys
    pub fn validate(&self) -> Result<()> {
        if self.wallet_address.trim().is_empty() {
            return Err(ClusterError::MalformedEvent(format!(
                "event {} has no wallet address",
                self.id
            )));
        }
        if self.token_address.trim().is_empty() {
            return Err(ClusterError::MalformedEvent(format!(
                "event {} has no token address",
                self.id
            )));
        }
        if self.timestamp_ms < 0 {
            return Err(ClusterError::MalformedEvent(format!(
                "event {} has negative timestamp {}",
                self.id, self.timestamp_ms
            )));
        }
        Ok(())
    }
}
