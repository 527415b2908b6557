use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprint;
use crate::core::errors::{CacheError, CacheResult};
use crate::utils::Metrics;

/// Stored analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    /// Opaque serialized result
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Value returned by [`ResponseCache::get_or_insert_with`]
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<T> {
    pub value: T,
    pub from_cache: bool,
}

/// Persistent fingerprint → payload store for expensive analysis calls.
///
/// - Entries live in memory and are written to `responses.json` on [`flush`](Self::flush)
/// - No eviction; [`clear_all`](Self::clear_all) is the only way to shrink it
/// - Storage failures degrade to an in-memory (or disabled) cache, never to an error
/// - Per-fingerprint async locks keep concurrent workers from computing the same entry twice
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
    // None when running without persistent storage
    cache_file: Option<PathBuf>,
    enabled: bool,
    dirty: AtomicBool,
    in_flight: DashMap<Fingerprint, Arc<AsyncMutex<()>>>,
    metrics: Option<Metrics>,
}

impl ResponseCache {
    pub const FILE_NAME: &'static str = "responses.json";

    /// Open (or create) the cache stored in `cache_dir`.
    ///
    /// Never fails: if the directory or file cannot be used, the cache keeps
    /// working in memory for the lifetime of the process.
    pub async fn open(cache_dir: impl AsRef<Path>, metrics: Option<Metrics>) -> Self {
        let cache_dir = cache_dir.as_ref();

        match Self::load(cache_dir).await {
            Ok((cache_file, entries)) => {
                info!(
                    "Response cache opened at {} ({} entries)",
                    cache_file.display(),
                    entries.len()
                );
                Self::build(Some(cache_file), entries, true, metrics)
            }
            Err(e) => {
                warn!("{}; continuing with an in-memory cache", e);
                Self::build(None, BTreeMap::new(), true, metrics)
            }
        }
    }

    /// Cache that never touches disk
    pub fn in_memory(metrics: Option<Metrics>) -> Self {
        Self::build(None, BTreeMap::new(), true, metrics)
    }

    /// Cache that misses every lookup and stores nothing
    pub fn disabled() -> Self {
        Self::build(None, BTreeMap::new(), false, None)
    }

    fn build(
        cache_file: Option<PathBuf>,
        entries: BTreeMap<String, CacheEntry>,
        enabled: bool,
        metrics: Option<Metrics>,
    ) -> Self {
        if let Some(ref m) = metrics {
            m.update_cache_size(entries.len());
        }

        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(entries),
                cache_file,
                enabled,
                dirty: AtomicBool::new(false),
                in_flight: DashMap::new(),
                metrics,
            }),
        }
    }

    async fn load(cache_dir: &Path) -> CacheResult<(PathBuf, BTreeMap<String, CacheEntry>)> {
        tokio::fs::create_dir_all(cache_dir)
            .await
            .map_err(|source| CacheError::Unavailable {
                path: cache_dir.to_path_buf(),
                source,
            })?;

        let cache_file = cache_dir.join(Self::FILE_NAME);

        let entries = match tokio::fs::read_to_string(&cache_file).await {
            Ok(data) => match serde_json::from_str::<BTreeMap<String, CacheEntry>>(&data) {
                Ok(entries) => Self::retain_valid(entries, &cache_file),
                Err(e) => {
                    warn!(
                        "Cache file {} is unreadable ({}), starting empty",
                        cache_file.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(CacheError::LoadFailed {
                    path: cache_file,
                    source,
                })
            }
        };

        Ok((cache_file, entries))
    }

    /// Drop entries whose key is not a fingerprint or disagrees with the entry
    fn retain_valid(
        mut entries: BTreeMap<String, CacheEntry>,
        cache_file: &Path,
    ) -> BTreeMap<String, CacheEntry> {
        let before = entries.len();
        entries.retain(|key, entry| {
            Fingerprint::from_hex(key).is_some() && entry.fingerprint == *key
        });

        let dropped = before - entries.len();
        if dropped > 0 {
            warn!(
                "Ignored {} malformed entries in {}",
                dropped,
                cache_file.display()
            );
        }
        entries
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.cache_file.is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a payload
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        if !self.inner.enabled {
            return None;
        }

        let payload = self
            .inner
            .entries
            .read()
            .get(&fingerprint.to_hex())
            .map(|entry| entry.payload.clone());

        if let Some(ref m) = self.inner.metrics {
            if payload.is_some() {
                m.record_cache_hit();
            } else {
                m.record_cache_miss();
            }
        }

        payload
    }

    /// Store a payload, replacing any previous entry for the same fingerprint
    pub fn put(&self, fingerprint: &Fingerprint, payload: String) {
        if !self.inner.enabled {
            return;
        }

        let key = fingerprint.to_hex();
        let entry = CacheEntry {
            fingerprint: key.clone(),
            payload,
            created_at: Utc::now(),
        };

        {
            let mut entries = self.inner.entries.write();
            entries.insert(key, entry);

            if let Some(ref m) = self.inner.metrics {
                m.update_cache_size(entries.len());
            }
        }

        self.inner.dirty.store(true, Ordering::Release);
    }

    /// Remove every entry. Persisted on the next flush.
    pub fn clear_all(&self) {
        let removed = {
            let mut entries = self.inner.entries.write();
            let removed = entries.len();
            entries.clear();
            removed
        };
        self.inner.dirty.store(true, Ordering::Release);

        if let Some(ref m) = self.inner.metrics {
            m.update_cache_size(0);
        }

        info!("Response cache cleared ({} entries removed)", removed);
    }

    /// Return the cached value for `fingerprint`, or compute, store and return it.
    ///
    /// Concurrent callers with the same fingerprint are serialized, so the
    /// second one sees the first one's result. Payloads that no longer
    /// deserialize into `T` are recomputed.
    pub async fn get_or_insert_with<T, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> anyhow::Result<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if !self.inner.enabled {
            let value = compute().await?;
            return Ok(Lookup {
                value,
                from_cache: false,
            });
        }

        let lock = self
            .inner
            .in_flight
            .entry(*fingerprint)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value()
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.lookup_or_compute(fingerprint, compute).await
        };

        drop(lock);
        self.inner
            .in_flight
            .remove_if(fingerprint, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn lookup_or_compute<T, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> anyhow::Result<Lookup<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(payload) = self.get(fingerprint) {
            match serde_json::from_str::<T>(&payload) {
                Ok(value) => {
                    debug!("Cache hit for {}", fingerprint);
                    return Ok(Lookup {
                        value,
                        from_cache: true,
                    });
                }
                Err(e) => warn!("Invalid cache entry {}, recomputing: {}", fingerprint, e),
            }
        }

        let value = compute().await?;

        match serde_json::to_string(&value) {
            Ok(payload) => self.put(fingerprint, payload),
            Err(e) => warn!("Could not serialize result for {}: {}", fingerprint, e),
        }

        Ok(Lookup {
            value,
            from_cache: false,
        })
    }

    /// Write pending changes to disk (temp file + rename).
    pub async fn flush(&self) -> CacheResult<()> {
        let Some(cache_file) = self.inner.cache_file.as_ref() else {
            return Ok(());
        };

        if !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.write_to(cache_file).await;
        if result.is_err() {
            self.inner.dirty.store(true, Ordering::Release);
        }
        result
    }

    async fn write_to(&self, cache_file: &Path) -> CacheResult<()> {
        let json = {
            let entries = self.inner.entries.read();
            serde_json::to_string_pretty(&*entries)?
        };

        let tmp_file = cache_file.with_extension("json.tmp");
        tokio::fs::write(&tmp_file, json)
            .await
            .map_err(|source| CacheError::SaveFailed {
                path: tmp_file.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_file, cache_file)
            .await
            .map_err(|source| CacheError::SaveFailed {
                path: cache_file.to_path_buf(),
                source,
            })?;

        debug!("Response cache written to {}", cache_file.display());
        Ok(())
    }

    /// Entry count and on-disk size in MB
    pub async fn stats(&self) -> (usize, f64) {
        let entries = self.len();

        let size_bytes = match self.inner.cache_file {
            Some(ref file) => tokio::fs::metadata(file)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
            None => 0,
        };

        (entries, size_bytes as f64 / (1024.0 * 1024.0))
    }
}
