use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::core::error::{EngineError, Result};

// Values ordered by parameter name, joined with underscores. Absent
// optionals format as "null" so they still occupy a slot in the key.
pub fn cache_key(params: &[(&str, Option<String>)]) -> String {
    let mut sorted: Vec<&(&str, Option<String>)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|entry| entry.1.as_deref().unwrap_or("null"))
        .collect::<Vec<&str>>()
        .join("_")
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub value: String,
    pub last_updated: SystemTime,
}

// A key is written at most once; replacing a value means purging the cache.
pub trait ResultCache {
    fn fetch(&self, key: &str) -> Option<CacheEntry>;

    fn upsert(&self, key: &str, value: &str) -> bool;

    fn purge(&self) -> usize;
}

// A failed computation stores nothing.
pub fn get_or_compute<T, F>(cache: &dyn ResultCache, key: &str, compute: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    if let Some(entry) = cache.fetch(key) {
        debug!(key, "cache hit");
        return serde_json::from_str(&entry.value).map_err(|e| {
            EngineError::computation_failure(format!("cached result for {key} cannot be decoded: {e}"))
        });
    }
    debug!(key, "cache miss");
    let value = compute()?;
    let blob = serde_json::to_string(&value).map_err(|e| {
        EngineError::computation_failure(format!("result for {key} cannot be serialized: {e}"))
    })?;
    cache.upsert(key, &blob);
    Ok(value)
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

impl ResultCache for MemoryCache {
    fn fetch(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn upsert(&self, key: &str, value: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(CacheEntry {
                    value: value.to_string(),
                    last_updated: SystemTime::now(),
                });
                true
            }
        }
    }

    fn purge(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();
        count
    }
}
