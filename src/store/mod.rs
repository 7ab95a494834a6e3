//! Shared TTL key-value store
//!
//! The store is the engine's only shared state and its only clock: buckets and
//! cooldown markers disappear when their TTL lapses, never by explicit delete.
//! Every value carries a version so writers can do optimistic
//! compare-and-swap instead of blind read-modify-write.

pub mod clock;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::error::Result;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::InMemoryTtlStore;
pub use self::redis::RedisTtlStore;

/// Raw stored payload and its write version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub payload: String,
    pub version: u64,
}

/// Decoded value and the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Key-value store with per-key expiry.
///
/// Implementations must never expire a key before its TTL has elapsed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Read a live key
    async fn get(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Unconditional write; bumps the version
    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()>;

    /// Write only if the current version matches `expected` (`None` = key absent)
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        payload: String,
        ttl: Duration,
    ) -> Result<bool>;

    /// Write only if the key is absent; `true` when this call created it
    async fn set_if_absent(&self, key: &str, payload: String, ttl: Duration) -> Result<bool>;
}

/// Typed JSON helpers over any [`TtlStore`]
#[async_trait]
pub trait TtlStoreExt: TtlStore {
    async fn get_cached<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(stored) => Ok(Some(serde_json::from_str(&stored.payload)?)),
            None => Ok(None),
        }
    }

    async fn get_versioned<T>(&self, key: &str) -> Result<Option<Versioned<T>>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(stored) => Ok(Some(Versioned {
                value: serde_json::from_str(&stored.payload)?,
                version: stored.version,
            })),
            None => Ok(None),
        }
    }

    async fn set_cached<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let payload = serde_json::to_string(value)?;
        self.set(key, payload, ttl).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

impl<S: TtlStore + ?Sized> TtlStoreExt for S {}

#[async_trait]
impl<S: TtlStore + ?Sized> TtlStore for std::sync::Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        (**self).set(key, payload, ttl).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        payload: String,
        ttl: Duration,
    ) -> Result<bool> {
        (**self).compare_and_set(key, expected, payload, ttl).await
    }

    async fn set_if_absent(&self, key: &str, payload: String, ttl: Duration) -> Result<bool> {
        (**self).set_if_absent(key, payload, ttl).await
    }
}
