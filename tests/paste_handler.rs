use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use pastebin::application::access::PasteAccess;
use pastebin::application::error::PasteHandlerError;
use pastebin::application::paste::PasteHandler;
use pastebin::application::repos::{
    CacheEntry, CacheError, IdGenerator, PasteCache, PasteIdStream, PasteStore, RenderError,
    Renderer, StorageError,
};
use pastebin::application::tasks::{
    BackgroundFault, BackgroundTasks, FailurePolicy, FaultReceiver, TaskConfig,
};
use pastebin::cache::{CacheConfig, MemoryCache};
use pastebin::domain::paste::{PasteId, PasteMeta, PasteMetaToCreate, RawContent};
use time::{Duration, OffsetDateTime};

#[derive(Default)]
struct MemoryStore {
    pastes: Mutex<HashMap<PasteId, (Option<Bytes>, PasteMeta)>>,
    meta_reads: AtomicUsize,
    raw_reads: AtomicUsize,
    failing: AtomicBool,
    failing_deletes: AtomicBool,
}

impl MemoryStore {
    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::unavailable("simulated outage"))
        } else {
            Ok(())
        }
    }

    fn insert(&self, paste_id: &PasteId, raw: &'static [u8], meta: PasteMeta) {
        self.pastes
            .lock()
            .expect("store lock")
            .insert(paste_id.clone(), (Some(Bytes::from_static(raw)), meta));
    }

    /// Meta without raw, as seen when a delete races a read.
    fn insert_without_raw(&self, paste_id: &PasteId, meta: PasteMeta) {
        self.pastes
            .lock()
            .expect("store lock")
            .insert(paste_id.clone(), (None, meta));
    }

    fn len(&self) -> usize {
        self.pastes.lock().expect("store lock").len()
    }
}

#[async_trait]
impl PasteStore for MemoryStore {
    async fn write_paste(
        &self,
        paste_id: &PasteId,
        raw: RawContent,
        meta: &PasteMeta,
    ) -> Result<(), StorageError> {
        self.check()?;
        let chunks: Vec<Bytes> = raw.into_stream().try_collect().await?;
        let mut buffer = BytesMut::new();
        for chunk in chunks {
            buffer.extend_from_slice(&chunk);
        }
        self.pastes
            .lock()
            .expect("store lock")
            .insert(paste_id.clone(), (Some(buffer.freeze()), meta.clone()));
        Ok(())
    }

    async fn read_paste_meta(&self, paste_id: &PasteId) -> Result<Option<PasteMeta>, StorageError> {
        self.meta_reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let pastes = self.pastes.lock().expect("store lock");
        Ok(pastes.get(paste_id).map(|(_, meta)| meta.clone()))
    }

    async fn read_paste_raw(&self, paste_id: &PasteId) -> Result<Option<Bytes>, StorageError> {
        self.raw_reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let pastes = self.pastes.lock().expect("store lock");
        Ok(pastes.get(paste_id).and_then(|(raw, _)| raw.clone()))
    }

    async fn delete_paste(&self, paste_id: &PasteId) -> Result<(), StorageError> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("delete refused"));
        }
        self.pastes.lock().expect("store lock").remove(paste_id);
        Ok(())
    }

    fn read_all_paste_ids(&self) -> PasteIdStream {
        let ids: Vec<Result<PasteId, StorageError>> = self
            .pastes
            .lock()
            .expect("store lock")
            .keys()
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(ids).boxed()
    }
}

/// Accelerator that fails every call.
struct FailingCache;

#[async_trait]
impl PasteCache for FailingCache {
    async fn get_paste_meta(&self, _paste_id: &PasteId) -> Result<Option<PasteMeta>, CacheError> {
        Err(CacheError::unavailable("cache offline"))
    }

    async fn get_paste_raw(&self, _paste_id: &PasteId) -> Result<Option<Bytes>, CacheError> {
        Err(CacheError::unavailable("cache offline"))
    }

    async fn get_paste_rendered(
        &self,
        _paste_id: &PasteId,
    ) -> Result<Option<String>, CacheError> {
        Err(CacheError::unavailable("cache offline"))
    }

    async fn push_paste_any(
        &self,
        _paste_id: &PasteId,
        _entry: CacheEntry,
    ) -> Result<(), CacheError> {
        Err(CacheError::unavailable("cache offline"))
    }

    async fn remove_paste(&self, _paste_id: &PasteId) -> Result<(), CacheError> {
        Err(CacheError::unavailable("cache offline"))
    }
}

/// Renders as `[lexer]content` so tests can see which lexer was chosen.
#[derive(Default)]
struct TaggingRenderer {
    calls: AtomicUsize,
}

impl Renderer for TaggingRenderer {
    fn highlight(&self, content: &str, lexer_name: &str) -> Result<String, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[{lexer_name}]{content}"))
    }

    fn is_valid_lexer(&self, _lexer_name: &str) -> bool {
        true
    }

    fn lexer_names(&self) -> Vec<String> {
        vec!["text".to_string()]
    }
}

#[derive(Default)]
struct SequentialIds {
    next: AtomicUsize,
}

impl IdGenerator for SequentialIds {
    fn new_id(&self, long: bool) -> PasteId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let value = if long {
            format!("long-paste-{n:08}")
        } else {
            format!("p{n}")
        };
        PasteId::parse(&value).expect("generated id is valid")
    }
}

struct Harness {
    handler: PasteHandler,
    store: Arc<MemoryStore>,
    renderer: Arc<TaggingRenderer>,
    faults: FaultReceiver,
}

fn harness(cache: Arc<dyn PasteCache>) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let renderer = Arc::new(TaggingRenderer::default());
    let (tasks, faults) = BackgroundTasks::start(&TaskConfig::default(), FailurePolicy::default());
    let handler = PasteHandler::new(
        store.clone(),
        cache,
        renderer.clone(),
        Arc::new(SequentialIds::default()),
        tasks,
    );
    Harness {
        handler,
        store,
        renderer,
        faults,
    }
}

fn id(value: &str) -> PasteId {
    PasteId::parse(value).expect("valid id")
}

fn meta(paste_id: &PasteId, lexer: Option<&str>) -> PasteMeta {
    PasteMetaToCreate {
        title: Some("sample".to_string()),
        lexer_name: lexer.map(str::to_string),
        ..Default::default()
    }
    .into_meta(paste_id.clone())
}

#[tokio::test]
async fn reads_fall_through_to_store_and_warm_the_cache() {
    let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let h = harness(cache.clone());
    let paste_id = id("stored");
    let stored_meta = meta(&paste_id, Some("rust"));
    h.store.insert(&paste_id, b"fn main() {}", stored_meta.clone());

    let read_meta = h.handler.get_paste_meta(&paste_id).await.expect("meta");
    let read_raw = h.handler.get_paste_raw(&paste_id).await.expect("raw");
    let rendered = h
        .handler
        .get_paste_rendered(&paste_id, None)
        .await
        .expect("rendered");

    assert_eq!(read_meta, Some(stored_meta.clone()));
    assert_eq!(read_raw.as_deref(), Some(&b"fn main() {}"[..]));
    assert_eq!(rendered.as_deref(), Some("[rust]fn main() {}"));

    h.handler.tasks().wait_idle().await;
    assert_eq!(
        cache.get_paste_meta(&paste_id).await.expect("cache read"),
        Some(stored_meta)
    );
    assert_eq!(
        cache.get_paste_raw(&paste_id).await.expect("cache read").as_deref(),
        Some(&b"fn main() {}"[..])
    );
    assert_eq!(
        cache.get_paste_rendered(&paste_id).await.expect("cache read").as_deref(),
        Some("[rust]fn main() {}")
    );
}

#[tokio::test]
async fn raw_is_cached_before_the_read_returns() {
    let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let h = harness(cache.clone());
    let paste_id = id("warm");
    h.store.insert(&paste_id, b"payload", meta(&paste_id, None));

    h.handler.get_paste_raw(&paste_id).await.expect("raw");

    // No wait_idle: the raw write-back is awaited inline.
    assert!(cache.get_paste_raw(&paste_id).await.expect("cache read").is_some());
}

#[tokio::test]
async fn cache_hits_do_not_touch_the_store() {
    let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let h = harness(cache);
    let paste_id = id("hot");
    h.store.insert(&paste_id, b"hot", meta(&paste_id, None));

    h.handler.get_paste_meta(&paste_id).await.expect("meta");
    h.handler.get_paste_raw(&paste_id).await.expect("raw");
    h.handler.tasks().wait_idle().await;
    let meta_reads = h.store.meta_reads.load(Ordering::SeqCst);
    let raw_reads = h.store.raw_reads.load(Ordering::SeqCst);

    h.handler.get_paste_meta(&paste_id).await.expect("meta");
    h.handler.get_paste_raw(&paste_id).await.expect("raw");

    assert_eq!(h.store.meta_reads.load(Ordering::SeqCst), meta_reads);
    assert_eq!(h.store.raw_reads.load(Ordering::SeqCst), raw_reads);
}

#[tokio::test]
async fn rendered_cache_hit_skips_rendering() {
    let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let h = harness(cache);
    let paste_id = id("rendered");
    h.store.insert(&paste_id, b"x", meta(&paste_id, None));

    h.handler
        .get_paste_rendered(&paste_id, None)
        .await
        .expect("first render");
    h.handler.tasks().wait_idle().await;
    h.handler
        .get_paste_rendered(&paste_id, None)
        .await
        .expect("second render");

    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
}

async fn scripted_session(h: &Harness) -> Vec<String> {
    let mut seen = Vec::new();
    let created = h
        .handler
        .create_paste(
            false,
            RawContent::from(&b"hello"[..]),
            PasteMetaToCreate {
                title: Some("greeting".to_string()),
                lexer_name: Some("text".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("create");
    seen.push(created.to_string());

    let meta = h
        .handler
        .get_paste_meta(&created)
        .await
        .expect("meta")
        .expect("present");
    seen.push(format!("{:?}", meta.title));
    let raw = h
        .handler
        .get_paste_raw(&created)
        .await
        .expect("raw")
        .expect("present");
    seen.push(String::from_utf8_lossy(&raw).into_owned());
    for lexer in [None, Some("python"), None] {
        let rendered = h
            .handler
            .get_paste_rendered(&created, lexer)
            .await
            .expect("rendered")
            .expect("present");
        seen.push(rendered);
        h.handler.tasks().wait_idle().await;
    }
    seen.push(format!(
        "{:?}",
        h.handler.get_paste_meta(&id("missing")).await.expect("meta")
    ));

    h.handler.remove_paste(&created);
    h.handler.tasks().wait_idle().await;
    seen.push(format!(
        "{:?}",
        h.handler.get_paste_meta(&created).await.expect("meta")
    ));
    seen
}

#[tokio::test]
async fn failing_cache_changes_nothing_observable() {
    let working = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let mut failing = harness(Arc::new(FailingCache));

    let expected = scripted_session(&working).await;
    let observed = scripted_session(&failing).await;

    assert_eq!(observed, expected);
    // Cache failures are logged, never escalated.
    assert!(failing.faults.try_recv().is_none());
}

#[tokio::test]
async fn absent_and_storage_failure_are_distinct() {
    let h = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let never = id("never-created");

    assert!(h.handler.get_paste_meta(&never).await.expect("meta").is_none());
    assert!(h.handler.get_paste_raw(&never).await.expect("raw").is_none());
    assert!(
        h.handler
            .get_paste_rendered(&never, None)
            .await
            .expect("rendered")
            .is_none()
    );

    h.store.fail(true);
    let err = h
        .handler
        .get_paste_meta(&never)
        .await
        .expect_err("storage outage");
    assert!(matches!(err, PasteHandlerError::Storage(_)));
    let err = h
        .handler
        .get_paste_raw(&never)
        .await
        .expect_err("storage outage");
    assert!(matches!(err, PasteHandlerError::Storage(_)));
    let err = h
        .handler
        .get_paste_rendered(&never, None)
        .await
        .expect_err("storage outage");
    assert!(matches!(err, PasteHandlerError::Storage(_)));
}

#[tokio::test]
async fn lexer_override_never_reaches_the_shared_cache() {
    let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let h = harness(cache.clone());
    let paste_id = id("override");
    h.store.insert(&paste_id, b"print(1)", meta(&paste_id, Some("rust")));

    let custom = h
        .handler
        .get_paste_rendered(&paste_id, Some("python"))
        .await
        .expect("render");
    assert_eq!(custom.as_deref(), Some("[python]print(1)"));
    h.handler.tasks().wait_idle().await;
    assert!(cache.get_paste_rendered(&paste_id).await.expect("cache read").is_none());

    let shared = h
        .handler
        .get_paste_rendered(&paste_id, None)
        .await
        .expect("render");
    assert_eq!(shared.as_deref(), Some("[rust]print(1)"));
    h.handler.tasks().wait_idle().await;

    // A cached default render is not served to an override request either.
    let custom = h
        .handler
        .get_paste_rendered(&paste_id, Some("python"))
        .await
        .expect("render");
    assert_eq!(custom.as_deref(), Some("[python]print(1)"));
    assert_eq!(
        cache.get_paste_rendered(&paste_id).await.expect("cache read").as_deref(),
        Some("[rust]print(1)")
    );
}

#[tokio::test]
async fn default_lexer_applies_when_paste_names_none() {
    let store = Arc::new(MemoryStore::default());
    let (tasks, _faults) = BackgroundTasks::start(&TaskConfig::default(), FailurePolicy::default());
    let handler = PasteHandler::new(
        store.clone(),
        Arc::new(MemoryCache::new(&CacheConfig::default())),
        Arc::new(TaggingRenderer::default()),
        Arc::new(SequentialIds::default()),
        tasks,
    )
    .with_default_lexer("markdown");
    let paste_id = id("nolexer");
    store.insert(&paste_id, b"# title", meta(&paste_id, None));

    let rendered = handler
        .get_paste_rendered(&paste_id, None)
        .await
        .expect("render");
    assert_eq!(rendered.as_deref(), Some("[markdown]# title"));
}

#[tokio::test]
async fn missing_raw_reads_as_absent() {
    let h = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let paste_id = id("halfgone");
    h.store.insert_without_raw(&paste_id, meta(&paste_id, None));

    let rendered = h
        .handler
        .get_paste_rendered(&paste_id, None)
        .await
        .expect("render");
    assert!(rendered.is_none());
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn removal_is_idempotent() {
    let mut h = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let paste_id = h
        .handler
        .create_paste(false, RawContent::from(&b"bye"[..]), PasteMetaToCreate::default())
        .await
        .expect("create");
    h.handler.tasks().wait_idle().await;

    h.handler.remove_paste(&paste_id);
    h.handler.remove_paste(&paste_id);
    h.handler.tasks().wait_idle().await;

    assert_eq!(h.store.len(), 0);
    assert!(h.handler.get_paste_meta(&paste_id).await.expect("meta").is_none());
    assert!(h.faults.try_recv().is_none());
}

#[tokio::test]
async fn created_paste_is_readable_immediately() {
    let h = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let config = PasteMetaToCreate {
        title: Some("first".to_string()),
        ..Default::default()
    };

    let paste_id = h
        .handler
        .create_paste(false, RawContent::from(&b"hello"[..]), config.clone())
        .await
        .expect("create");

    let raw = h.handler.get_paste_raw(&paste_id).await.expect("raw");
    let meta = h.handler.get_paste_meta(&paste_id).await.expect("meta");
    assert_eq!(raw.as_deref(), Some(&b"hello"[..]));
    assert_eq!(meta.and_then(|meta| meta.title), config.title);
}

#[tokio::test]
async fn long_and_short_ids_come_from_the_generator() {
    let h = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let short = h
        .handler
        .create_paste(false, RawContent::from(&b"a"[..]), PasteMetaToCreate::default())
        .await
        .expect("create");
    let long = h
        .handler
        .create_paste(true, RawContent::from(&b"b"[..]), PasteMetaToCreate::default())
        .await
        .expect("create");

    assert!(short.as_str().len() < long.as_str().len());
}

#[tokio::test]
async fn failed_create_caches_nothing() {
    let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let h = harness(cache.clone());
    h.store.fail(true);

    let err = h
        .handler
        .create_paste(false, RawContent::from(&b"lost"[..]), PasteMetaToCreate::default())
        .await
        .expect_err("storage outage");
    assert!(matches!(err, PasteHandlerError::Storage(_)));

    h.handler.tasks().wait_idle().await;
    assert_eq!(cache.lens(), (0, 0, 0));
}

#[tokio::test]
async fn enumeration_tracks_store_contents() {
    let h = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let mut created = Vec::new();
    for body in [&b"a"[..], &b"b"[..], &b"c"[..]] {
        created.push(
            h.handler
                .create_paste(false, RawContent::from(body), PasteMetaToCreate::default())
                .await
                .expect("create"),
        );
    }

    let listed: HashSet<PasteId> = h
        .handler
        .all_paste_ids()
        .try_collect()
        .await
        .expect("enumerate");
    assert_eq!(listed, created.iter().cloned().collect());

    h.handler.remove_paste(&created[1]);
    h.handler.tasks().wait_idle().await;

    let listed: HashSet<PasteId> = h
        .handler
        .all_paste_ids()
        .try_collect()
        .await
        .expect("enumerate");
    assert_eq!(
        listed,
        HashSet::from([created[0].clone(), created[2].clone()])
    );
}

#[tokio::test]
async fn failed_durable_delete_is_escalated() {
    let mut h = harness(Arc::new(FailingCache));
    let paste_id = id("sticky");
    h.store.insert(&paste_id, b"x", meta(&paste_id, None));
    h.store.failing_deletes.store(true, Ordering::SeqCst);

    h.handler.remove_paste(&paste_id);
    h.handler.tasks().wait_idle().await;

    match h.faults.try_recv() {
        Some(BackgroundFault::Storage(failure)) => {
            assert_eq!(failure.operation, "delete_paste");
            assert_eq!(failure.paste_id, paste_id);
        }
        other => panic!("expected escalated storage failure, got {other:?}"),
    }
    // The failing cache eviction is only logged.
    assert!(h.faults.try_recv().is_none());
}

#[tokio::test]
async fn removal_after_store_tier_reads_leaves_nothing_cached() {
    let cache = Arc::new(MemoryCache::new(&CacheConfig::default()));
    let h = harness(cache.clone());
    let ids: Vec<PasteId> = (0..16).map(|n| id(&format!("gone-{n}"))).collect();
    for paste_id in &ids {
        h.store.insert(paste_id, b"short-lived", meta(paste_id, Some("text")));
    }

    for paste_id in &ids {
        // Store-tier reads schedule refills; removal is dispatched right behind them.
        h.handler.get_paste_meta(paste_id).await.expect("meta");
        h.handler.get_paste_rendered(paste_id, None).await.expect("render");
        h.handler.remove_paste(paste_id);
    }
    h.handler.tasks().wait_idle().await;

    for paste_id in &ids {
        assert!(!cache.contains(paste_id), "{paste_id} was refilled after removal");
    }
    assert_eq!(cache.lens(), (0, 0, 0));
    assert_eq!(h.store.len(), 0);
}

#[tokio::test]
async fn purge_counts_scheduled_removals_and_escalates_failed_deletes() {
    let mut h = harness(Arc::new(MemoryCache::new(&CacheConfig::default())));
    let access = PasteAccess::new(h.handler.clone());
    let paste_id = id("stale");
    let expired = PasteMetaToCreate {
        expire_dt: Some(OffsetDateTime::now_utc() - Duration::minutes(1)),
        ..Default::default()
    }
    .into_meta(paste_id.clone());
    h.store.insert(&paste_id, b"old", expired);
    h.store.failing_deletes.store(true, Ordering::SeqCst);

    let report = access.purge_expired().await.expect("purge");
    h.handler.tasks().wait_idle().await;

    assert_eq!(report.scanned, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(h.store.len(), 1);
    assert!(matches!(
        h.faults.try_recv(),
        Some(BackgroundFault::Storage(failure)) if failure.paste_id == paste_id
    ));
}
