//! Namespaced TTL cache shared by every source adapter.
//!
//! # Key Strategy
//!
//! Callers build keys with [`cache_key`]: a SHA-256 of the function name and
//! its sorted parameters. The [`Cache`] handle then prefixes the namespace
//! (one per provider), so identical keys from two providers never collide.
//!
//! # Expiry
//!
//! Entries carry an absolute expiry. Expiry is checked on read and an expired
//! entry is deleted before the read returns. There is no eviction task.

pub mod file;
pub mod memory;
pub mod redis_store;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::{ResearchError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Cache Types
// ============================================================================

/// Stored blob: opaque JSON text plus an absolute expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    /// Unix epoch milliseconds
    pub expires_at: i64,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Data volatility class, used to pick a TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    /// Profiles, historical statements, filings
    Slow,
    /// Quotes, intraday series, news
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub long: Duration,
    pub short: Duration,
}

impl TtlPolicy {
    pub fn new(long: Duration, short: Duration) -> Self {
        Self { long, short }
    }

    pub fn ttl_for(&self, volatility: Volatility) -> Duration {
        match volatility {
            Volatility::Slow => self.long,
            Volatility::Fast => self.short,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            long: Duration::from_secs(24 * 60 * 60),
            short: Duration::from_secs(5 * 60),
        }
    }
}

/// Backing store. Implementations synchronize internally; callers never lock.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn store(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Delete `key` if it is still expired at `now_ms`
    async fn evict_expired(&self, key: &str, now_ms: i64) -> Result<()> {
        let _ = now_ms;
        self.remove(key).await
    }

    fn backend(&self) -> &'static str;
}

/// Deterministic key for a provider function and its parameters
pub fn cache_key(function: &str, params: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(function.as_bytes());
    hasher.update(b":");
    for (name, value) in params {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"&");
    }
    format!("{:x}", hasher.finalize())
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Namespaced Handle
// ============================================================================

/// Namespaced view over a shared [`CacheStore`].
///
/// Failures inside the cache never surface: reads degrade to a miss and
/// writes are logged and dropped.
#[derive(Clone)]
pub struct Cache {
    namespace: String,
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, namespace: &str) -> Result<Self> {
        if namespace.is_empty() || namespace.contains(':') {
            return Err(ResearchError::Cache(format!(
                "invalid cache namespace '{}'",
                namespace
            )));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            store,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store_key = self.store_key(key);

        let entry = match self.store.load(&store_key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Cache read failed for {} ({}): {}", store_key, self.store.backend(), e);
                return None;
            }
        };

        let now = now_millis();
        if entry.is_expired_at(now) {
            tracing::debug!("Cache entry expired: {}", store_key);
            if let Err(e) = self.store.evict_expired(&store_key, now).await {
                tracing::warn!("Failed to delete expired cache entry {}: {}", store_key, e);
            }
            return None;
        }

        match serde_json::from_str(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", store_key, e);
                if let Err(e) = self.store.remove(&store_key).await {
                    tracing::warn!("Failed to delete cache entry {}: {}", store_key, e);
                }
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let store_key = self.store_key(key);

        let value = match serde_json::to_string(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Skipping cache write for {}: value not serializable: {}", store_key, e);
                return;
            }
        };

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            key: store_key.clone(),
            value,
            expires_at: now_millis().saturating_add(ttl_ms),
        };

        if let Err(e) = self.store.store(entry).await {
            tracing::warn!("Cache write failed for {} ({}): {}", store_key, self.store.backend(), e);
        }
    }

    pub async fn delete(&self, key: &str) {
        let store_key = self.store_key(key);
        if let Err(e) = self.store.remove(&store_key).await {
            tracing::warn!("Cache delete failed for {}: {}", store_key, e);
        }
    }
}
