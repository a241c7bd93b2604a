//! Filesystem-backed named caches.
//!
//! Each named cache is a directory under the store root. An entry is a
//! pair of files keyed by the sha256 of the request URL: a JSON metadata
//! sidecar and the raw body. The sidecar is written last, so its presence
//! implies a complete body.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::CacheError;

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    content_type: Option<String>,
    stored_ts: i64,
}

/// A response read back out of a cache tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Root directory holding every named cache.
#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a named cache, creating its directory if needed.
    pub async fn open(&self, name: &str) -> Result<CacheTier, CacheError> {
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(CacheTier {
            name: name.to_string(),
            dir,
        })
    }

    /// Names of every cache currently on disk.
    pub async fn list(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // A store that was never written to has no caches.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a named cache and everything in it. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.root.join(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// One named cache directory.
pub struct CacheTier {
    name: String,
    dir: PathBuf,
}

impl CacheTier {
    /// Look up a stored response by URL. Unreadable entries count as
    /// misses so a damaged file heals on the next store.
    pub async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>, CacheError> {
        let (meta_path, body_path) = self.entry_paths(url);
        let raw_meta = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta = match serde_json::from_slice(&raw_meta) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(cache = %self.name, url = %url, error = %e, "corrupt cache entry, treating as miss");
                return Ok(None);
            }
        };
        let body = match tokio::fs::read(&body_path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(cache = %self.name, url = %url, "cache entry missing its body, treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(cache = %self.name, url = %url, "cache hit");
        Ok(Some(CachedResponse {
            status: meta.status,
            content_type: meta.content_type,
            body,
        }))
    }

    /// Store a response under its URL, replacing any previous entry.
    pub async fn store(
        &self,
        url: &str,
        status: u16,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), CacheError> {
        let (meta_path, body_path) = self.entry_paths(url);
        tokio::fs::write(&body_path, body).await?;
        let meta = EntryMeta {
            url: url.to_string(),
            status,
            content_type: content_type.map(|s| s.to_string()),
            stored_ts: chrono::Utc::now().timestamp_millis(),
        };
        tokio::fs::write(&meta_path, serde_json::to_vec(&meta)?).await?;
        debug!(cache = %self.name, url = %url, status, "cached response");
        Ok(())
    }

    fn entry_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash = hex::encode(hasher.finalize());
        (
            self.dir.join(format!("{hash}.json")),
            self.dir.join(format!("{hash}.body")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_root() -> PathBuf {
        std::env::temp_dir().join(format!(
            "reelwatch_cache_store_{}_{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::SeqCst),
        ))
    }

    #[tokio::test]
    async fn store_and_lookup_round_trip() {
        let store = CacheStore::new(test_root());
        let tier = store.open("v3-runtime").await.unwrap();

        tier.store("https://api.example/tv/42", 200, Some("application/json"), b"{\"id\":42}")
            .await
            .unwrap();

        let hit = tier.lookup("https://api.example/tv/42").await.unwrap().unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.content_type.as_deref(), Some("application/json"));
        assert_eq!(hit.body, b"{\"id\":42}");
    }

    #[tokio::test]
    async fn unknown_urls_miss() {
        let store = CacheStore::new(test_root());
        let tier = store.open("v3").await.unwrap();
        assert!(tier.lookup("https://app.example/nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_meta_counts_as_miss() {
        let store = CacheStore::new(test_root());
        let tier = store.open("v3").await.unwrap();
        tier.store("https://app.example/x", 200, None, b"body").await.unwrap();

        let (meta_path, _) = tier.entry_paths("https://app.example/x");
        tokio::fs::write(&meta_path, b"{not json").await.unwrap();

        assert!(tier.lookup("https://app.example/x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_and_delete_caches() {
        let store = CacheStore::new(test_root());
        store.open("v2").await.unwrap();
        store.open("v2-runtime").await.unwrap();
        store.open("v3").await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["v2", "v2-runtime", "v3"]);

        assert!(store.delete("v2").await.unwrap());
        assert!(!store.delete("v2").await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec!["v2-runtime", "v3"]);
    }

    #[tokio::test]
    async fn listing_an_empty_root_is_fine() {
        let store = CacheStore::new(test_root());
        assert!(store.list().await.unwrap().is_empty());
    }
}
