//! Response cache keyed by `SourceFingerprint`
//!
//! Successful enrichments and "not found" markers are both cached so re-runs
//! do not repeat billed calls. Transient failures are never cached.
//!
//! `ResponseCache::get_or_populate` serializes work per fingerprint: a second
//! caller for the same key waits on the first and then reads its stored
//! result instead of issuing a duplicate fetch.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::fingerprint::SourceFingerprint;
use crate::types::{Failure, FailureKind, PartialEnrichment, SourceId};

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CachedOutcome {
    Found { enrichment: PartialEnrichment },
    /// Original failure, replayed verbatim on a hit
    NotFound { failure: Failure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: SourceFingerprint,
    pub outcome: CachedOutcome,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(fingerprint: SourceFingerprint, outcome: CachedOutcome) -> Self {
        Self {
            fingerprint,
            outcome,
            stored_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.stored_at) < ttl
    }
}

// =============================================================================
// Backing stores
// =============================================================================

/// Storage backend for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &SourceFingerprint) -> Result<Option<CacheEntry>>;

    async fn put(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &SourceFingerprint) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<SourceFingerprint, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &SourceFingerprint) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &SourceFingerprint) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// One JSON file per fingerprint under a directory; survives across runs
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &SourceFingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &SourceFingerprint) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&text) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // Unreadable entries are treated as misses and rewritten
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt cache entry");
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.fingerprint);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&entry)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &SourceFingerprint) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Get-or-populate front end
// =============================================================================

/// Result of a cache-fronted fetch
#[derive(Debug, Clone)]
pub struct CacheResolution {
    pub result: std::result::Result<PartialEnrichment, Failure>,
    /// True when no network call was made
    pub hit: bool,
}

/// Per-source cache with TTL, forced refresh, and per-key coalescing
pub struct ResponseCache {
    source: SourceId,
    store: Arc<dyn CacheStore>,
    ttl: chrono::Duration,
    refresh: bool,
    refreshed: Mutex<HashSet<SourceFingerprint>>,
    in_flight: Mutex<HashMap<SourceFingerprint, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResponseCache {
    pub fn new(source: SourceId, store: Arc<dyn CacheStore>, ttl: chrono::Duration) -> Self {
        Self {
            source,
            store,
            ttl,
            refresh: false,
            refreshed: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Bypass existing entries (once per fingerprint) regardless of TTL
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Start a new run: forced refresh bypasses every fingerprint once again
    pub fn begin_run(&self) {
        self.refreshed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Explicitly drop a cached entry
    pub async fn invalidate(&self, key: &SourceFingerprint) -> Result<()> {
        self.store.remove(key).await
    }

    /// Return the cached outcome for `key`, or run `populate` and cache it
    pub async fn get_or_populate<F, Fut>(
        &self,
        key: &SourceFingerprint,
        populate: F,
    ) -> CacheResolution
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<PartialEnrichment, Failure>>,
    {
        let slot = self.slot(key);
        let resolution = {
            let _guard = slot.lock().await;
            match self.lookup(key).await {
                Some(outcome) => CacheResolution {
                    result: Self::outcome_to_result(outcome),
                    hit: true,
                },
                None => {
                    let result = populate().await;
                    self.store_result(key, &result).await;
                    CacheResolution { result, hit: false }
                }
            }
        };
        self.release(key, &slot);
        resolution
    }

    fn slot(&self, key: &SourceFingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.entry(key.clone()).or_default().clone()
    }

    fn release(&self, key: &SourceFingerprint, slot: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only handed out under this lock: map + ours means no waiters
        if Arc::strong_count(slot) <= 2 {
            in_flight.remove(key);
        }
    }

    async fn lookup(&self, key: &SourceFingerprint) -> Option<CachedOutcome> {
        if self.refresh {
            let mut refreshed = self
                .refreshed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if refreshed.insert(key.clone()) {
                return None;
            }
        }

        match self.store.get(key).await {
            Ok(Some(entry)) if entry.is_fresh(self.ttl, Utc::now()) => Some(entry.outcome),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(source = %self.source, error = %e, "Cache read failed, fetching");
                None
            }
        }
    }

    async fn store_result(
        &self,
        key: &SourceFingerprint,
        result: &std::result::Result<PartialEnrichment, Failure>,
    ) {
        let outcome = match result {
            Ok(partial) => CachedOutcome::Found {
                enrichment: partial.clone(),
            },
            Err(failure) if failure.kind == FailureKind::NotFound => CachedOutcome::NotFound {
                failure: failure.clone(),
            },
            Err(_) => return,
        };

        if let Err(e) = self.store.put(CacheEntry::new(key.clone(), outcome)).await {
            tracing::warn!(source = %self.source, error = %e, "Cache write failed");
        }
    }

    fn outcome_to_result(outcome: CachedOutcome) -> std::result::Result<PartialEnrichment, Failure> {
        match outcome {
            CachedOutcome::Found { enrichment } => Ok(enrichment),
            CachedOutcome::NotFound { failure } => Err(failure),
        }
    }
}
