//! Store key derivation
//!
//! Bucket, cooldown and delivery keys live in disjoint namespaces so their
//! state never collides:
//!
//! - `cluster:seen:<chain>:<token>:<bucketStart>`
//! - `cluster:emitted:<chain>:<token>`
//! - `cluster:delivered:<signalId>`

use crate::domain::Chain;

const MS_PER_MINUTE: i64 = 60_000;

/// Case-fold an address for comparison and key building.
///
/// EVM addresses are case-insensitive hex. Solana base58 addresses are
/// case-sensitive but go through the same fold; base58 has no practical
/// collisions under lower-casing, so this is a known quirk rather than a
/// cross-chain rule.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Start of the window containing `timestamp_ms`.
///
/// Concurrent events for the same real-world window always land on the
/// same value. Window lengths that overflow an `i64` millisecond span
/// saturate; `ClusterConfig::validate` rejects them before they get here.
pub fn bucket_start(timestamp_ms: i64, window_minutes: u64) -> i64 {
    let window_ms = i64::try_from(window_minutes)
        .unwrap_or(i64::MAX)
        .saturating_mul(MS_PER_MINUTE)
        .max(1);
    timestamp_ms.div_euclid(window_ms) * window_ms
}

pub fn bucket_key(chain: Chain, token_address: &str, bucket_start: i64) -> String {
    format!(
        "cluster:seen:{}:{}:{}",
        chain,
        normalize_address(token_address),
        bucket_start
    )
}

pub fn cooldown_key(chain: Chain, token_address: &str) -> String {
    format!("cluster:emitted:{}:{}", chain, normalize_address(token_address))
}

pub fn signal_id(chain: Chain, token_address: &str, bucket_start: i64) -> String {
    format!(
        "cluster:{}:{}:{}",
        chain,
        normalize_address(token_address),
        bucket_start
    )
}

pub fn delivered_key(signal_id: &str) -> String {
    format!("cluster:delivered:{}", signal_id)
}

/// Every key a single trade event touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterKeys {
    pub bucket_start: i64,
    pub bucket_key: String,
    pub cooldown_key: String,
    pub signal_id: String,
}

impl ClusterKeys {
    pub fn derive(chain: Chain, token_address: &str, timestamp_ms: i64, window_minutes: u64) -> Self {
        let start = bucket_start(timestamp_ms, window_minutes);
        Self {
            bucket_start: start,
            bucket_key: bucket_key(chain, token_address, start),
            cooldown_key: cooldown_key(chain, token_address),
            signal_id: signal_id(chain, token_address, start),
        }
    }
}
