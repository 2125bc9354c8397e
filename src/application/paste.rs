//! Cache-aside orchestration between the accelerator and the durable store.
//!
//! Reads check the cache first and fall back to the store; any cache failure is
//! logged and treated as a miss. Store failures other than "not found" are
//! surfaced as [`PasteHandlerError::Storage`]. Cache population after a store
//! read or a create happens on [`BackgroundTasks`], except for raw content,
//! which is written back before returning so a following render finds it warm.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::application::error::PasteHandlerError;
use crate::application::lookup::Tier;
use crate::application::repos::{
    CacheEntry, IdGenerator, PasteCache, PasteIdStream, PasteStore, Renderer,
};
use crate::application::tasks::BackgroundTasks;
use crate::domain::paste::{PasteId, PasteMeta, PasteMetaToCreate, RawContent};

pub const DEFAULT_LEXER: &str = "text";

/// Explicitly constructed mediator shared by every request entry point.
#[derive(Clone)]
pub struct PasteHandler {
    store: Arc<dyn PasteStore>,
    cache: Arc<dyn PasteCache>,
    renderer: Arc<dyn Renderer>,
    ids: Arc<dyn IdGenerator>,
    tasks: BackgroundTasks,
    default_lexer: String,
}

impl PasteHandler {
    pub fn new(
        store: Arc<dyn PasteStore>,
        cache: Arc<dyn PasteCache>,
        renderer: Arc<dyn Renderer>,
        ids: Arc<dyn IdGenerator>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            store,
            cache,
            renderer,
            ids,
            tasks,
            default_lexer: DEFAULT_LEXER.to_string(),
        }
    }

    /// Lexer used when neither the caller nor the paste names one.
    pub fn with_default_lexer(mut self, lexer: impl Into<String>) -> Self {
        self.default_lexer = lexer.into();
        self
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Store a new paste and return its freshly assigned id.
    #[instrument(skip(self, raw, config))]
    pub async fn create_paste(
        &self,
        long_id: bool,
        raw: RawContent,
        config: PasteMetaToCreate,
    ) -> Result<PasteId, PasteHandlerError> {
        let paste_id = self.ids.new_id(long_id);
        let meta = config.into_meta(paste_id.clone());

        self.store
            .write_paste(&paste_id, raw, &meta)
            .await
            .map_err(PasteHandlerError::Storage)?;
        debug!(paste_id = %paste_id, "Paste written to storage");

        self.populate_in_background("push_meta", &paste_id, CacheEntry::meta(meta));
        Ok(paste_id)
    }

    #[instrument(skip(self), fields(paste_id = %paste_id))]
    pub async fn get_paste_meta(
        &self,
        paste_id: &PasteId,
    ) -> Result<Option<PasteMeta>, PasteHandlerError> {
        let cached = Tier::from(self.cache.get_paste_meta(paste_id).await);
        match cached {
            Tier::Hit(meta) => {
                debug!("cache hit for meta-'{paste_id}'");
                return Ok(Some(meta));
            }
            Tier::Miss => {}
            Tier::Failure(err) => {
                warn!(error = %err, "cache raised an error reading meta, trying storage");
            }
        }

        match Tier::from(self.store.read_paste_meta(paste_id).await) {
            Tier::Hit(meta) => {
                debug!("cache miss for meta-'{paste_id}'");
                let entry = CacheEntry::meta(meta.clone());
                self.populate_in_background("push_meta", paste_id, entry);
                Ok(Some(meta))
            }
            Tier::Miss => Ok(None),
            Tier::Failure(err) => Err(PasteHandlerError::Storage(err)),
        }
    }

    #[instrument(skip(self), fields(paste_id = %paste_id))]
    pub async fn get_paste_raw(
        &self,
        paste_id: &PasteId,
    ) -> Result<Option<Bytes>, PasteHandlerError> {
        match Tier::from(self.cache.get_paste_raw(paste_id).await) {
            Tier::Hit(raw) => {
                debug!("cache hit for raw-'{paste_id}'");
                return Ok(Some(raw));
            }
            Tier::Miss => {}
            Tier::Failure(err) => {
                warn!(error = %err, "cache raised an error reading raw, trying storage");
            }
        }

        match Tier::from(self.store.read_paste_raw(paste_id).await) {
            Tier::Hit(raw) => {
                debug!("cache miss for raw-'{paste_id}'");
                // Awaited: the render path right after this wants the cache warm.
                if let Err(err) = self
                    .cache
                    .push_paste_any(paste_id, CacheEntry::raw(raw.clone()))
                    .await
                {
                    warn!(error = %err, "cache raised an error storing raw, continuing");
                }
                Ok(Some(raw))
            }
            Tier::Miss => Ok(None),
            Tier::Failure(err) => Err(PasteHandlerError::Storage(err)),
        }
    }

    /// Highlighted paste content.
    ///
    /// A `custom_lexer` bypasses the shared rendered cache in both directions:
    /// it is never served from it and its output is never written to it.
    #[instrument(skip(self), fields(paste_id = %paste_id))]
    pub async fn get_paste_rendered(
        &self,
        paste_id: &PasteId,
        custom_lexer: Option<&str>,
    ) -> Result<Option<String>, PasteHandlerError> {
        if custom_lexer.is_none() {
            match Tier::from(self.cache.get_paste_rendered(paste_id).await) {
                Tier::Hit(rendered) => {
                    debug!("cache hit for rendered-'{paste_id}'");
                    return Ok(Some(rendered));
                }
                Tier::Miss => {}
                Tier::Failure(err) => {
                    warn!(
                        error = %err,
                        "cache raised an error reading rendered, trying storage"
                    );
                }
            }
        }

        // No meta means the paste does not exist.
        let Some(meta) = self.get_paste_meta(paste_id).await? else {
            return Ok(None);
        };
        let Some(raw) = self.get_paste_raw(paste_id).await? else {
            return Ok(None);
        };
        debug!("cache miss for rendered-'{paste_id}'");

        let lexer_name = custom_lexer
            .map(str::to_string)
            .or(meta.lexer_name)
            .unwrap_or_else(|| self.default_lexer.clone());
        let rendered = self.highlight(raw, lexer_name).await?;

        if custom_lexer.is_none() {
            self.populate_in_background(
                "push_rendered",
                paste_id,
                CacheEntry::rendered(rendered.clone()),
            );
        }
        Ok(Some(rendered))
    }

    /// Every stored id, straight from the durable store.
    pub fn all_paste_ids(&self) -> PasteIdStream {
        self.store.read_all_paste_ids()
    }

    /// Schedule deletion from both tiers; returns before either completes.
    ///
    /// Cache refills already dispatched for this paste run before the eviction.
    /// A read that reaches the store before the durable delete lands can still
    /// schedule a fresh refill, which then lives until the entry is evicted.
    #[instrument(skip(self), fields(paste_id = %paste_id))]
    pub fn remove_paste(&self, paste_id: &PasteId) {
        let store = Arc::clone(&self.store);
        let id = paste_id.clone();
        self.tasks.schedule_storage("delete_paste", paste_id.clone(), async move {
            store.delete_paste(&id).await
        });

        let cache = Arc::clone(&self.cache);
        let id = paste_id.clone();
        self.tasks.schedule_cache("remove_cached_paste", paste_id.clone(), async move {
            cache.remove_paste(&id).await
        });
    }

    fn populate_in_background(&self, label: &'static str, paste_id: &PasteId, entry: CacheEntry) {
        let cache = Arc::clone(&self.cache);
        let id = paste_id.clone();
        self.tasks.schedule_cache(label, paste_id.clone(), async move {
            cache.push_paste_any(&id, entry).await
        });
    }

    async fn highlight(&self, raw: Bytes, lexer_name: String) -> Result<String, PasteHandlerError> {
        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || {
            let content = String::from_utf8_lossy(&raw);
            renderer.highlight(&content, &lexer_name)
        })
        .await
        .map_err(|err| PasteHandlerError::RenderAborted(err.to_string()))?
        .map_err(PasteHandlerError::Render)
    }
}
