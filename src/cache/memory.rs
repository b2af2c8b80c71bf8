use super::{CacheEntry, CacheStore};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

const SHARD_COUNT: usize = 16;

/// In-process store.
///
/// Keys are spread over independently locked shards so concurrent access to
/// different keys rarely contends. Locks are never held across an await.
pub struct MemoryStore {
    shards: Vec<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, CacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.shard(key).read().get(key).cloned())
    }

    async fn store(&self, entry: CacheEntry) -> Result<()> {
        self.shard(&entry.key).write().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.shard(key).write().remove(key);
        Ok(())
    }

    /// Re-checks under the write lock so a fresh write racing the expired
    /// read is kept.
    async fn evict_expired(&self, key: &str, now_ms: i64) -> Result<()> {
        let mut shard = self.shard(key).write();
        if shard.get(key).is_some_and(|entry| entry.is_expired_at(now_ms)) {
            shard.remove(key);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
