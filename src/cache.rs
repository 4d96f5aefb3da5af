use crate::{CaravaneError, Result};
use fjall::{Database, Keyspace};
use serde::Deserialize;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task;

#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    value: T,
    expires_at: Option<u64>, // Unix timestamp (seconds), None never expires
}

/// Persistent key/value store backing the geocoding cache and target state.
///
/// Cloning is cheap and every clone shares the same on-disk keyspace.
#[derive(Clone)]
pub struct PersistentCache {
    db: Database,
    store: Keyspace,
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> anyhow::Result<Option<Vec<u8>>> {
    Ok(store.get(key)?.map(|v| v.to_vec()))
}

fn cache_err(err: impl std::fmt::Display) -> CaravaneError {
    CaravaneError::cache(err.to_string())
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(cache_err)?
        .as_secs())
}

impl PersistentCache {
    /// Opens (or creates) the store under `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = Database::builder(path).open().map_err(cache_err)?;
        let store = db
            .keyspace("cache", fjall::KeyspaceCreateOptions::default)
            .map_err(cache_err)?;
        tracing::debug!("Opened persistent cache at {}", path.display());
        Ok(PersistentCache { db, store })
    }

    /// Stores a serializable value, optionally with a time-to-live (TTL).
    #[tracing::instrument(name = "put_cache", level = "debug", skip(self, value))]
    pub async fn put<T: Serialize + Send + Debug + 'static>(
        &self,
        key: &str,
        value: T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        let expires_at = match ttl {
            Some(ttl) => Some(
                SystemTime::now()
                    .checked_add(ttl)
                    .ok_or_else(|| CaravaneError::cache("TTL overflow"))?
                    .duration_since(UNIX_EPOCH)
                    .map_err(cache_err)?
                    .as_secs(),
            ),
            None => None,
        };
        let entry = StoredEntry { value, expires_at };
        let bytes = postcard::to_stdvec(&entry).map_err(cache_err)?;

        task::spawn_blocking(move || store.insert(key, bytes))
            .await
            .map_err(cache_err)?
            .map_err(cache_err)?;
        Ok(())
    }

    /// Retrieves a value if it exists and has not expired.
    /// Returns `None` for cache misses or expired entries.
    #[tracing::instrument(name = "query_cache", level = "debug", skip(self))]
    pub async fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> Result<Option<T>> {
        let store = self.store.clone();
        let key_bytes = key.as_bytes().to_vec();

        let maybe_bytes: Option<Vec<u8>> =
            task::spawn_blocking(move || get_from_store(store, key_bytes))
                .await
                .map_err(cache_err)?
                .map_err(cache_err)?;

        let Some(bytes) = maybe_bytes else {
            tracing::debug!("Key not found");
            return Ok(None);
        };

        let entry: StoredEntry<T> = postcard::from_bytes(&bytes).map_err(cache_err)?;
        match entry.expires_at {
            Some(expires_at) if unix_now()? >= expires_at => {
                tracing::debug!("Key found but expired");
                self.remove(key).await?;
                Ok(None)
            }
            _ => {
                tracing::debug!("Key found and still fresh");
                Ok(Some(entry.value))
            }
        }
    }

    /// Manually removes a key from the cache.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let key = key.as_bytes().to_vec();
        let store = self.store.clone();
        task::spawn_blocking(move || store.remove(key))
            .await
            .map_err(cache_err)?
            .map_err(cache_err)?;
        Ok(())
    }

    /// Flushes pending writes to disk.
    pub async fn persist(&self) -> Result<()> {
        let db = self.db.clone();
        task::spawn_blocking(move || db.persist(fjall::PersistMode::SyncAll))
            .await
            .map_err(cache_err)?
            .map_err(cache_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();

        cache
            .put("geocode:Lyon", "feature".to_string(), None)
            .await
            .unwrap();
        let value: Option<String> = cache.get("geocode:Lyon").await.unwrap();
        assert_eq!(value.as_deref(), Some("feature"));

        let missing: Option<String> = cache.get("geocode:Paris").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();

        cache
            .put("geocode:Lyon", 42u64, Some(Duration::ZERO))
            .await
            .unwrap();
        let value: Option<u64> = cache.get("geocode:Lyon").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();

        cache.put("target:hexagone", 1u8, None).await.unwrap();
        cache.remove("target:hexagone").await.unwrap();
        let value: Option<u8> = cache.get("target:hexagone").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = PersistentCache::open(dir.path()).unwrap();
            cache.put("geocode:Lyon", "x".to_string(), None).await.unwrap();
            cache.persist().await.unwrap();
        }
        let cache = PersistentCache::open(dir.path()).unwrap();
        let value: Option<String> = cache.get("geocode:Lyon").await.unwrap();
        assert_eq!(value.as_deref(), Some("x"));
    }
}
