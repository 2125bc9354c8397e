//! Paste accelerator cache.
//!
//! Holds copies of paste metadata, raw bytes and rendered output in three
//! independent LRU channels. Nothing here is authoritative: entries may be
//! evicted at any time and the durable store is consulted on every miss.
//!
//! ```toml
//! [cache]
//! enabled = true
//! meta_limit = 1000
//! raw_limit = 200
//! rendered_limit = 200
//! max_raw_bytes = 524288
//! ```

mod config;
mod lock;
mod store;

pub use config::CacheConfig;
pub use store::{MemoryCache, NoopCache};

use std::sync::Arc;

use crate::application::repos::PasteCache;

/// Build the accelerator described by `config`.
pub fn build(config: &CacheConfig) -> Arc<dyn PasteCache> {
    if config.enabled {
        Arc::new(MemoryCache::new(config))
    } else {
        Arc::new(NoopCache)
    }
}
