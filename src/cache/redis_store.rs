use super::{now_millis, CacheEntry, CacheStore};
use crate::{ResearchError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

const KEY_PREFIX: &str = "finresearch:cache";

/// Redis-backed store for sharing the cache between processes.
///
/// Entries are written with `SET ... PX` so Redis drops them on its own;
/// the expiry is still checked on read like every other backend.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| ResearchError::Cache("Redis connection timeout after 5 seconds".to_string()))??;

        tracing::info!("Connected to Redis cache at {}", redis_url);

        Ok(Self { conn })
    }

    fn redis_key(key: &str) -> String {
        format!("{}:{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::redis_key(key)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, entry: CacheEntry) -> Result<()> {
        let ttl_ms = entry.expires_at - now_millis();
        if ttl_ms <= 0 {
            return Ok(());
        }
        let json = serde_json::to_string(&entry)?;
        let mut conn = self.conn.clone();
        conn.pset_ex::<_, _, ()>(Self::redis_key(&entry.key), json, ttl_ms as u64)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::redis_key(key)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
