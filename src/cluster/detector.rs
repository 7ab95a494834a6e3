//! Cluster detector
//!
//! Consumes one trade event at a time, folds qualifying buys into the
//! (chain, token, window) bucket held in the TTL store, and emits a
//! [`ClusterSignal`] when enough distinct trusted wallets have bought.
//!
//! The detector holds no per-token state of its own. Everything lives in the
//! store, so any number of detector instances (or processes) can run against
//! the same store concurrently.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::keys::{bucket_key, bucket_start, cooldown_key, ClusterKeys};
use crate::config::{ClusterConfig, ConsistencyMode, StoreConfig};
use crate::domain::{
    BucketWallet, Chain, ClusterBucket, ClusterSignal, TokenClusterState, TradeEvent,
};
use crate::error::{ClusterError, Result};
use crate::store::{Clock, SystemClock, TtlStore, TtlStoreExt};

/// Payload of the cooldown key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownMarker {
    pub signal_id: String,
    pub emitted_at_ms: i64,
}

#[derive(Clone)]
pub struct ClusterDetector<S> {
    store: S,
    clock: Arc<dyn Clock>,
    consistency: ConsistencyMode,
    cas_max_retries: u32,
}

impl<S: TtlStore> ClusterDetector<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            consistency: ConsistencyMode::Optimistic,
            cas_max_retries: 5,
        }
    }

    pub fn from_config(store: S, config: &StoreConfig) -> Self {
        Self::new(store)
            .with_consistency(config.consistency)
            .with_cas_max_retries(config.cas_max_retries)
    }

    /// Clock used for `created_at_ms` on emitted signals
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyMode) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_cas_max_retries(mut self, attempts: u32) -> Self {
        self.cas_max_retries = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process one trade event.
    ///
    /// Returns `Ok(Some(signal))` only for the event that finds the bucket at
    /// or above `min_cluster_size` while no cooldown is armed. Store failures
    /// propagate; the event should then be treated as unprocessed.
    #[instrument(skip_all, fields(event_id = %event.id, chain = %event.chain))]
    pub async fn process_trade_event(
        &self,
        event: &TradeEvent,
        config: &ClusterConfig,
    ) -> Result<Option<ClusterSignal>> {
        config.validate()?;

        // Fast rejects, no store access
        if !event.is_buy() {
            return Ok(None);
        }
        if event.trust_score_or_zero() < config.min_trust_score {
            return Ok(None);
        }

        event.validate()?;

        let keys = ClusterKeys::derive(
            event.chain,
            &event.token_address,
            event.timestamp_ms,
            config.window_minutes,
        );

        if self.store.exists(&keys.cooldown_key).await? {
            debug!(token = %event.token_address, "cooldown active, suppressing");
            return Ok(None);
        }

        let bucket = match self.consistency {
            ConsistencyMode::Optimistic => self.admit_optimistic(event, &keys, config).await?,
            ConsistencyMode::BestEffort => self.admit_best_effort(event, &keys, config).await?,
        };

        if bucket.len() < config.min_cluster_size {
            return Ok(None);
        }

        let signal = ClusterSignal::from_bucket(
            keys.signal_id.clone(),
            event.chain,
            &event.token_address,
            config.window_minutes,
            &bucket,
            self.clock.now_ms(),
        );

        if !self.arm_cooldown(&keys, &signal, config).await? {
            debug!(signal_id = %signal.id, "another invocation already emitted");
            return Ok(None);
        }

        info!(
            "Cluster signal {}: {} wallets bought {} (avg trust {})",
            signal.id,
            signal.cluster_size,
            signal.token_symbol.as_deref().unwrap_or(&signal.token_address),
            signal.avg_trust_score
        );

        Ok(Some(signal))
    }

    /// Current lifecycle state of a token, as seen from the store at `at_ms`
    pub async fn token_state(
        &self,
        chain: Chain,
        token_address: &str,
        at_ms: i64,
        config: &ClusterConfig,
    ) -> Result<TokenClusterState> {
        config.validate()?;

        if self.store.exists(&cooldown_key(chain, token_address)).await? {
            return Ok(TokenClusterState::Signaled);
        }

        match self.load_bucket(chain, token_address, at_ms, config).await? {
            Some(bucket) if !bucket.is_empty() => Ok(TokenClusterState::Accumulating {
                wallets: bucket.len(),
            }),
            _ => Ok(TokenClusterState::Idle),
        }
    }

    /// Bucket for the window containing `at_ms`, if it is still live
    pub async fn load_bucket(
        &self,
        chain: Chain,
        token_address: &str,
        at_ms: i64,
        config: &ClusterConfig,
    ) -> Result<Option<ClusterBucket>> {
        config.validate()?;
        let key = bucket_key(
            chain,
            token_address,
            bucket_start(at_ms, config.window_minutes),
        );
        self.store.get_cached(&key).await
    }

    fn contribution(event: &TradeEvent) -> BucketWallet {
        BucketWallet {
            address: event.wallet_address.clone(),
            trader_id: event.trader_id.clone(),
            trust_score: event.unified_trust_score,
            added_at: event.timestamp_ms,
        }
    }

    /// Plain read-modify-write. Two concurrent events can both read the same
    /// bucket and the last writer wins.
    async fn admit_best_effort(
        &self,
        event: &TradeEvent,
        keys: &ClusterKeys,
        config: &ClusterConfig,
    ) -> Result<ClusterBucket> {
        let mut bucket = self
            .store
            .get_cached::<ClusterBucket>(&keys.bucket_key)
            .await?
            .unwrap_or_else(|| ClusterBucket::new(event.token_symbol.clone()));

        if bucket.add_wallet(Self::contribution(event)) {
            self.store
                .set_cached(
                    &keys.bucket_key,
                    &bucket,
                    Duration::from_secs(config.bucket_ttl_secs()),
                )
                .await?;
            debug!(
                bucket = %keys.bucket_key,
                wallets = bucket.len(),
                "wallet added"
            );
        }

        Ok(bucket)
    }

    /// Versioned read-modify-write, re-reading on conflict so a concurrent
    /// writer's wallet is never dropped.
    async fn admit_optimistic(
        &self,
        event: &TradeEvent,
        keys: &ClusterKeys,
        config: &ClusterConfig,
    ) -> Result<ClusterBucket> {
        let ttl = Duration::from_secs(config.bucket_ttl_secs());

        for attempt in 1..=self.cas_max_retries {
            let (mut bucket, version) = match self
                .store
                .get_versioned::<ClusterBucket>(&keys.bucket_key)
                .await?
            {
                Some(current) => (current.value, Some(current.version)),
                None => (ClusterBucket::new(event.token_symbol.clone()), None),
            };

            if !bucket.add_wallet(Self::contribution(event)) {
                return Ok(bucket);
            }

            let payload = serde_json::to_string(&bucket)?;
            if self
                .store
                .compare_and_set(&keys.bucket_key, version, payload, ttl)
                .await?
            {
                debug!(
                    bucket = %keys.bucket_key,
                    wallets = bucket.len(),
                    attempt,
                    "wallet added"
                );
                return Ok(bucket);
            }

            debug!(bucket = %keys.bucket_key, attempt, "bucket write conflict, retrying");
        }

        Err(ClusterError::WriteConflict {
            key: keys.bucket_key.clone(),
            attempts: self.cas_max_retries,
        })
    }

    /// Arm the cooldown. In optimistic mode only one caller can win the claim.
    async fn arm_cooldown(
        &self,
        keys: &ClusterKeys,
        signal: &ClusterSignal,
        config: &ClusterConfig,
    ) -> Result<bool> {
        let marker = CooldownMarker {
            signal_id: signal.id.clone(),
            emitted_at_ms: signal.created_at_ms,
        };
        let ttl = Duration::from_secs(config.cooldown_ttl_secs());

        match self.consistency {
            ConsistencyMode::Optimistic => {
                let payload = serde_json::to_string(&marker)?;
                self.store
                    .set_if_absent(&keys.cooldown_key, payload, ttl)
                    .await
            }
            ConsistencyMode::BestEffort => {
                self.store
                    .set_cached(&keys.cooldown_key, &marker, ttl)
                    .await?;
                Ok(true)
            }
        }
    }
}
