//! LRU translation cache with JSON persistence.
//!
//! Keyed by `(engine, source_lang, target_lang, text)`. Only successful
//! translations are stored. The in-memory map is guarded by a mutex held
//! only for the duration of a get/put; persistence serializes the entries
//! in recency order so a reload preserves eviction behavior.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use super::types::{CacheKey, Engine, TranslationRequest, TranslationResult};

const DEFAULT_CAPACITY: usize = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    engine: String,
    source_lang: String,
    target_lang: String,
    text: String,
    translated_text: String,
    confidence: f32,
}

#[derive(Debug, Clone)]
struct CachedValue {
    translated_text: String,
    confidence: f32,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<CacheKey, CachedValue>,
    // Recency index: sequence → key. O(log n) touch and eviction.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(value) = self.map.get_mut(key) {
            self.order.remove(&value.last_used);
            value.last_used = self.next_seq;
            self.order.insert(self.next_seq, key.clone());
            self.next_seq += 1;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug)]
pub struct TranslationCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl TranslationCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Look up a prior successful translation, refreshing its recency.
    pub fn get(&self, key: &CacheKey) -> Option<(String, f32)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.contains_key(key) {
            inner.touch(key);
            inner.hits += 1;
            let value = inner.map.get(key).unwrap();
            Some((value.translated_text.clone(), value.confidence))
        } else {
            inner.misses += 1;
            None
        }
    }

    /// Rebuild a full result from a cache hit, preserving the request's
    /// metadata. Cached results always report `success = true`.
    pub fn get_result(&self, request: &TranslationRequest) -> Option<TranslationResult> {
        let key = CacheKey::for_request(request);
        self.get(&key)
            .map(|(text, confidence)| TranslationResult::ok(request, text, confidence))
    }

    /// Insert a successful translation; failures never enter the cache.
    pub fn put(&self, key: CacheKey, result: &TranslationResult) {
        if !result.success || result.translated_text.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();

        let existing_seq = inner.map.get(&key).map(|v| v.last_used);
        if let Some(seq) = existing_seq {
            inner.order.remove(&seq);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.map.insert(
            key,
            CachedValue {
                translated_text: result.translated_text.clone(),
                confidence: result.confidence,
                last_used: seq,
            },
        );

        while inner.map.len() > self.capacity {
            let Some((&oldest, _)) = inner.order.iter().next() else {
                break;
            };
            if let Some(key) = inner.order.remove(&oldest) {
                inner.map.remove(&key);
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().unwrap().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            size: inner.map.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Serialize entries to JSON, least-recently-used first so loading
    /// re-inserts in recency order.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let entries: Vec<PersistedEntry> = inner
            .order
            .values()
            .filter_map(|key| {
                inner.map.get(key).map(|value| PersistedEntry {
                    engine: key.engine.to_string(),
                    source_lang: key.source_lang.clone(),
                    target_lang: key.target_lang.clone(),
                    text: key.text.clone(),
                    translated_text: value.translated_text.clone(),
                    confidence: value.confidence,
                })
            })
            .collect();
        drop(inner);

        let json = serde_json::to_string(&entries).context("Failed to serialize cache")?;
        crate::encoding::write_atomic(path.as_ref(), &json).context("Failed to write cache file")
    }

    /// Load persisted entries. Unknown engines and malformed files are
    /// tolerated: a cache that fails to load is just empty.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let content = crate::encoding::read_text_lossy(path.as_ref())?;
        let entries: Vec<PersistedEntry> =
            serde_json::from_str(&content).context("Failed to parse cache file")?;
        let count = entries.len();

        let mut inner = self.inner.lock().unwrap();
        for entry in entries {
            let Some(engine) = Engine::parse(&entry.engine) else {
                continue;
            };
            let key = CacheKey {
                engine: engine.as_str(),
                source_lang: entry.source_lang,
                target_lang: entry.target_lang,
                text: entry.text,
            };
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.order.insert(seq, key.clone());
            inner.map.insert(
                key,
                CachedValue {
                    translated_text: entry.translated_text,
                    confidence: entry.confidence,
                    last_used: seq,
                },
            );
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::types::{ErrorKind, TranslateError};

    fn request(text: &str) -> TranslationRequest {
        TranslationRequest::new(text, "en", "tr", Engine::Google)
    }

    fn ok_result(text: &str, translated: &str) -> TranslationResult {
        TranslationResult::ok(&request(text), translated.to_string(), 0.9)
    }

    #[test]
    fn hit_returns_identical_result() {
        let cache = TranslationCache::default();
        let req = request("Hello");
        cache.put(CacheKey::for_request(&req), &ok_result("Hello", "Merhaba"));

        let hit = cache.get_result(&req).unwrap();
        assert!(hit.success);
        assert_eq!(hit.translated_text, "Merhaba");
    }

    #[test]
    fn failures_are_never_stored() {
        let cache = TranslationCache::default();
        let req = request("Hello");
        let failure = TranslationResult::fail(
            &req,
            TranslateError::new(ErrorKind::Network, "connection reset"),
        );
        cache.put(CacheKey::for_request(&req), &failure);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_evicts_exactly_past_capacity() {
        let cache = TranslationCache::with_capacity(3);
        for i in 0..5 {
            let text = format!("text {i}");
            let req = request(&text);
            cache.put(CacheKey::for_request(&req), &ok_result(&text, "çeviri"));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&CacheKey::for_request(&request("text 0"))));
        assert!(!cache.contains(&CacheKey::for_request(&request("text 1"))));
        assert!(cache.contains(&CacheKey::for_request(&request("text 4"))));
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = TranslationCache::with_capacity(2);
        cache.put(CacheKey::for_request(&request("a")), &ok_result("a", "x"));
        cache.put(CacheKey::for_request(&request("b")), &ok_result("b", "y"));
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get(&CacheKey::for_request(&request("a"))).is_some());
        cache.put(CacheKey::for_request(&request("c")), &ok_result("c", "z"));

        assert!(cache.contains(&CacheKey::for_request(&request("a"))));
        assert!(!cache.contains(&CacheKey::for_request(&request("b"))));
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.json");

        let cache = TranslationCache::default();
        cache.put(CacheKey::for_request(&request("Hello")), &ok_result("Hello", "Merhaba"));
        cache.save(&path).unwrap();

        let restored = TranslationCache::default();
        assert_eq!(restored.load(&path).unwrap(), 1);
        let hit = restored.get_result(&request("Hello")).unwrap();
        assert_eq!(hit.translated_text, "Merhaba");
    }
}
