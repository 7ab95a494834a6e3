use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{StoredValue, TtlStore};
use crate::error::{ClusterError, Result};

/// Unconditional write that bumps the envelope version.
const SET_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
local v = 0
if cur then v = cjson.decode(cur)['v'] end
redis.call('SET', KEYS[1], cjson.encode({v = v + 1, d = ARGV[1]}), 'EX', ARGV[2])
return v + 1
"#;

/// Write only when the stored version equals ARGV[1] (0 = key absent).
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
local v = 0
if cur then v = cjson.decode(cur)['v'] end
if v ~= tonumber(ARGV[1]) then return 0 end
redis.call('SET', KEYS[1], cjson.encode({v = v + 1, d = ARGV[2]}), 'EX', ARGV[3])
return 1
"#;

/// On-the-wire value: payload plus write version
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u64,
    d: String,
}

/// Wrap a payload the way the Lua scripts do
fn encode_envelope(version: u64, payload: String) -> Result<String> {
    Ok(serde_json::to_string(&Envelope {
        v: version,
        d: payload,
    })?)
}

fn decode_envelope(key: &str, raw: &str) -> Result<StoredValue> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(|e| {
        ClusterError::store_unavailable("redis", format!("corrupt value at {key}: {e}"))
    })?;
    Ok(StoredValue {
        payload: envelope.d,
        version: envelope.v,
    })
}

/// Redis-backed TTL store shared by every detector process
#[derive(Clone)]
pub struct RedisTtlStore {
    conn: ConnectionManager,
    set_script: Script,
    cas_script: Script,
}

impl RedisTtlStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to redis TTL store");
        Ok(Self {
            conn,
            set_script: Script::new(SET_SCRIPT),
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    /// Redis rejects `EX 0`
    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl TtlStore for RedisTtlStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        raw.map(|raw| decode_envelope(key, &raw)).transpose()
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let version: u64 = self
            .set_script
            .key(key)
            .arg(payload)
            .arg(Self::ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        debug!(key, version, "redis set");
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        payload: String,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .cas_script
            .key(key)
            .arg(expected.unwrap_or(0))
            .arg(payload)
            .arg(Self::ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn set_if_absent(&self, key: &str, payload: String, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let envelope = encode_envelope(1, payload)?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(envelope)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}
