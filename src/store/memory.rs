use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::{StoredValue, TtlStore};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Slot {
    payload: String,
    version: u64,
    expires_at_ms: i64,
}

impl Slot {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

const DEFAULT_PURGE_EVERY: u64 = 1_024;

/// Process-local TTL store.
///
/// Expired keys are dropped lazily on access and swept by [`purge_expired`],
/// which also runs after every `purge_every` writes. Clones share the same
/// map, so one instance can back many detectors.
///
/// [`purge_expired`]: InMemoryTtlStore::purge_expired
#[derive(Debug, Clone)]
pub struct InMemoryTtlStore {
    entries: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
    writes: Arc<AtomicU64>,
    purge_every: u64,
}

impl Default for InMemoryTtlStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTtlStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            writes: Arc::new(AtomicU64::new(0)),
            purge_every: DEFAULT_PURGE_EVERY,
        }
    }

    /// Sweep expired keys after this many writes (minimum 1)
    pub fn with_purge_every(mut self, writes: u64) -> Self {
        self.purge_every = writes.max(1);
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn expires_at(&self, now_ms: i64, ttl: Duration) -> i64 {
        now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys held in memory, expired ones not yet swept included
    pub fn physical_len(&self) -> usize {
        self.entries.len()
    }

    /// Time left before `key` expires
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        let slot = self.entries.get(key)?;
        if !slot.is_live(now) {
            return None;
        }
        Some(Duration::from_millis((slot.expires_at_ms - now) as u64))
    }

    /// Drop every expired key, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            trace!(removed, "purged expired keys");
        }
        removed
    }
}

impl InMemoryTtlStore {
    fn write_slot(&self, key: &str, payload: String, ttl: Duration) {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expires_at(now, ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let version = occupied.get().version + 1;
                occupied.insert(Slot {
                    payload,
                    version,
                    expires_at_ms,
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    payload,
                    version: 1,
                    expires_at_ms,
                });
            }
        }
    }

    fn swap_slot(&self, key: &str, expected: Option<u64>, payload: String, ttl: Duration) -> bool {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expires_at(now, ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get();
                let current = slot.is_live(now).then_some(slot.version);
                if current != expected {
                    return false;
                }
                // Versions keep counting across lazy expiry so a stale reader
                // can't match a recreated key
                let version = slot.version + 1;
                occupied.insert(Slot {
                    payload,
                    version,
                    expires_at_ms,
                });
                true
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return false;
                }
                vacant.insert(Slot {
                    payload,
                    version: 1,
                    expires_at_ms,
                });
                true
            }
        }
    }

    fn claim_slot(&self, key: &str, payload: String, ttl: Duration) -> bool {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expires_at(now, ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return false;
                }
                let version = occupied.get().version + 1;
                occupied.insert(Slot {
                    payload,
                    version,
                    expires_at_ms,
                });
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    payload,
                    version: 1,
                    expires_at_ms,
                });
                true
            }
        }
    }

    /// Sweep every `purge_every` writes. Keys of past windows are never read
    /// again, so lazy expiry alone would keep them forever.
    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.purge_every == 0 {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl TtlStore for InMemoryTtlStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let now = self.clock.now_ms();
        if let Some(slot) = self.entries.get(key) {
            if slot.is_live(now) {
                return Ok(Some(StoredValue {
                    payload: slot.payload.clone(),
                    version: slot.version,
                }));
            }
        }
        self.entries.remove_if(key, |_, slot| !slot.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        self.write_slot(key, payload, ttl);
        self.note_write();
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        payload: String,
        ttl: Duration,
    ) -> Result<bool> {
        let swapped = self.swap_slot(key, expected, payload, ttl);
        self.note_write();
        Ok(swapped)
    }

    async fn set_if_absent(&self, key: &str, payload: String, ttl: Duration) -> Result<bool> {
        let claimed = self.claim_slot(key, payload, ttl);
        self.note_write();
        Ok(claimed)
    }
}
