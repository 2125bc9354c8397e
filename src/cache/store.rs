//! In-memory accelerator implementations.

use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use tracing::debug;

use crate::application::repos::{CacheEntry, CacheError, PasteCache};
use crate::domain::paste::{PasteId, PasteMeta};

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const METRIC_CACHE_HIT: &str = "pastebin_cache_hit_total";
const METRIC_CACHE_MISS: &str = "pastebin_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "pastebin_cache_evict_total";

/// One LRU keyed by paste id, with hit/miss/evict accounting.
struct Channel<V> {
    name: &'static str,
    entries: RwLock<LruCache<PasteId, V>>,
}

impl<V: Clone> Channel<V> {
    fn new(name: &'static str, limit: NonZeroUsize) -> Self {
        Self {
            name,
            entries: RwLock::new(LruCache::new(limit)),
        }
    }

    fn get(&self, paste_id: &PasteId) -> Option<V> {
        let value = rw_write(&self.entries, self.name, "get")
            .get(paste_id)
            .cloned();
        let metric = if value.is_some() {
            METRIC_CACHE_HIT
        } else {
            METRIC_CACHE_MISS
        };
        counter!(metric, "channel" => self.name).increment(1);
        value
    }

    fn put(&self, paste_id: PasteId, value: V) {
        let evicted = rw_write(&self.entries, self.name, "put").push(paste_id.clone(), value);
        if let Some((evicted_id, _)) = evicted.filter(|(key, _)| key != &paste_id) {
            debug!(channel = self.name, paste_id = %evicted_id, "Evicted paste from cache");
            counter!(METRIC_CACHE_EVICT, "channel" => self.name).increment(1);
        }
    }

    fn remove(&self, paste_id: &PasteId) {
        rw_write(&self.entries, self.name, "remove").pop(paste_id);
    }

    fn len(&self) -> usize {
        rw_read(&self.entries, self.name, "len").len()
    }

    fn contains(&self, paste_id: &PasteId) -> bool {
        rw_read(&self.entries, self.name, "contains").contains(paste_id)
    }
}

/// Process-local accelerator with separate meta, raw and rendered channels.
pub struct MemoryCache {
    max_raw_bytes: usize,
    meta: Channel<PasteMeta>,
    raw: Channel<Bytes>,
    rendered: Channel<String>,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_raw_bytes: config.max_raw_bytes,
            meta: Channel::new("meta", config.meta_limit_non_zero()),
            raw: Channel::new("raw", config.raw_limit_non_zero()),
            rendered: Channel::new("rendered", config.rendered_limit_non_zero()),
        }
    }

    /// Counts of cached (meta, raw, rendered) entries.
    pub fn lens(&self) -> (usize, usize, usize) {
        (self.meta.len(), self.raw.len(), self.rendered.len())
    }

    /// Whether any channel holds an entry for `paste_id`, without touching recency.
    pub fn contains(&self, paste_id: &PasteId) -> bool {
        self.meta.contains(paste_id)
            || self.raw.contains(paste_id)
            || self.rendered.contains(paste_id)
    }
}

#[async_trait]
impl PasteCache for MemoryCache {
    async fn get_paste_meta(&self, paste_id: &PasteId) -> Result<Option<PasteMeta>, CacheError> {
        Ok(self.meta.get(paste_id))
    }

    async fn get_paste_raw(&self, paste_id: &PasteId) -> Result<Option<Bytes>, CacheError> {
        Ok(self.raw.get(paste_id))
    }

    async fn get_paste_rendered(&self, paste_id: &PasteId) -> Result<Option<String>, CacheError> {
        Ok(self.rendered.get(paste_id))
    }

    async fn push_paste_any(
        &self,
        paste_id: &PasteId,
        entry: CacheEntry,
    ) -> Result<(), CacheError> {
        let CacheEntry {
            meta,
            raw,
            rendered,
        } = entry;

        if let Some(meta) = meta {
            self.meta.put(paste_id.clone(), meta);
        }
        if let Some(raw) = raw {
            if raw.len() <= self.max_raw_bytes {
                self.raw.put(paste_id.clone(), raw);
            } else {
                debug!(
                    paste_id = %paste_id,
                    size = raw.len(),
                    limit = self.max_raw_bytes,
                    "Raw paste too large to cache"
                );
            }
        }
        if let Some(rendered) = rendered {
            self.rendered.put(paste_id.clone(), rendered);
        }
        Ok(())
    }

    async fn remove_paste(&self, paste_id: &PasteId) -> Result<(), CacheError> {
        self.meta.remove(paste_id);
        self.raw.remove(paste_id);
        self.rendered.remove(paste_id);
        Ok(())
    }
}

/// Stand-in used when caching is disabled: every lookup misses, every write is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl PasteCache for NoopCache {
    async fn get_paste_meta(&self, _paste_id: &PasteId) -> Result<Option<PasteMeta>, CacheError> {
        Ok(None)
    }

    async fn get_paste_raw(&self, _paste_id: &PasteId) -> Result<Option<Bytes>, CacheError> {
        Ok(None)
    }

    async fn get_paste_rendered(
        &self,
        _paste_id: &PasteId,
    ) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn push_paste_any(
        &self,
        _paste_id: &PasteId,
        _entry: CacheEntry,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove_paste(&self, _paste_id: &PasteId) -> Result<(), CacheError> {
        Ok(())
    }
}
