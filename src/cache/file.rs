use super::{CacheEntry, CacheStore};
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One JSON file per entry under a cache directory.
///
/// Writes go to a uniquely named temp file and are renamed into place, so a
/// reader sees either the old or the new entry, never a partial one.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!("File cache at {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        // Hash collision or a foreign file reads as a miss
        Ok(Self::read_entry(&self.path_for(key))
            .await?
            .filter(|entry| entry.key == key))
    }

    async fn store(&self, entry: CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, serde_json::to_vec(&entry)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-reads the file before deleting it, so an entry rewritten after the
    /// caller's stale read survives.
    ///
    /// The file is first renamed aside; if the claimed copy turns out to be
    /// fresh it is linked back unless a newer write already took its place.
    async fn evict_expired(&self, key: &str, now_ms: i64) -> Result<()> {
        let path = self.path_for(key);
        match Self::read_entry(&path).await {
            Ok(Some(entry)) if entry.key != key || !entry.is_expired_at(now_ms) => return Ok(()),
            Ok(None) => return Ok(()),
            // Expired or unreadable
            Ok(Some(_)) | Err(_) => {}
        }

        let claimed = path.with_extension(format!("{}.evict", Uuid::new_v4().simple()));
        match tokio::fs::rename(&path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let fresh = matches!(
            Self::read_entry(&claimed).await,
            Ok(Some(entry)) if entry.key == key && !entry.is_expired_at(now_ms)
        );
        if fresh {
            tracing::debug!("Cache entry {} was rewritten during eviction, keeping it", key);
            match tokio::fs::hard_link(&claimed, &path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => tracing::warn!("Failed to restore cache entry {}: {}", key, e),
            }
        }
        tokio::fs::remove_file(&claimed).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
