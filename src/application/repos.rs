//! Collaborator traits the paste handler is written against.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::error::DomainError;
use crate::domain::paste::{PasteId, PasteMeta, RawContent};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored paste is corrupt: {message}")]
    Corrupt { message: String },
    #[error(transparent)]
    Meta(#[from] DomainError),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[derive(Debug, Error, Clone)]
pub enum RenderError {
    #[error("failed to highlight `{language}`: {message}")]
    Highlighting { language: String, message: String },
}

pub type PasteIdStream = BoxStream<'static, Result<PasteId, StorageError>>;

/// Authoritative persistent store.
#[async_trait]
pub trait PasteStore: Send + Sync {
    async fn write_paste(
        &self,
        paste_id: &PasteId,
        raw: RawContent,
        meta: &PasteMeta,
    ) -> Result<(), StorageError>;

    async fn read_paste_meta(&self, paste_id: &PasteId) -> Result<Option<PasteMeta>, StorageError>;

    async fn read_paste_raw(&self, paste_id: &PasteId) -> Result<Option<Bytes>, StorageError>;

    /// Deleting an id that does not exist succeeds.
    async fn delete_paste(&self, paste_id: &PasteId) -> Result<(), StorageError>;

    /// Lazily enumerate every stored id; each call starts a fresh walk.
    fn read_all_paste_ids(&self) -> PasteIdStream;
}

/// Partial upsert for the accelerator; absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub meta: Option<PasteMeta>,
    pub raw: Option<Bytes>,
    pub rendered: Option<String>,
}

impl CacheEntry {
    pub fn meta(meta: PasteMeta) -> Self {
        Self {
            meta: Some(meta),
            ..Default::default()
        }
    }

    pub fn raw(raw: Bytes) -> Self {
        Self {
            raw: Some(raw),
            ..Default::default()
        }
    }

    pub fn rendered(rendered: String) -> Self {
        Self {
            rendered: Some(rendered),
            ..Default::default()
        }
    }
}

/// Non-authoritative accelerator; every call is advisory.
#[async_trait]
pub trait PasteCache: Send + Sync {
    async fn get_paste_meta(&self, paste_id: &PasteId) -> Result<Option<PasteMeta>, CacheError>;

    async fn get_paste_raw(&self, paste_id: &PasteId) -> Result<Option<Bytes>, CacheError>;

    async fn get_paste_rendered(&self, paste_id: &PasteId) -> Result<Option<String>, CacheError>;

    async fn push_paste_any(&self, paste_id: &PasteId, entry: CacheEntry)
    -> Result<(), CacheError>;

    async fn remove_paste(&self, paste_id: &PasteId) -> Result<(), CacheError>;
}

/// Pure syntax highlighter.
pub trait Renderer: Send + Sync {
    fn highlight(&self, content: &str, lexer_name: &str) -> Result<String, RenderError>;

    fn is_valid_lexer(&self, lexer_name: &str) -> bool;

    fn lexer_names(&self) -> Vec<String>;
}

pub trait IdGenerator: Send + Sync {
    fn new_id(&self, long: bool) -> PasteId;
}
