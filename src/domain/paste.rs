//! Paste identity, metadata and raw payload types.

use std::fmt::{Display, Formatter};
use std::io;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use super::error::DomainError;

pub const CURRENT_PASTE_META_VERSION: u32 = 1;
pub const PASTE_ID_MAX_LEN: usize = 64;
pub const TITLE_MAX_CHARS: usize = 32;

/// Opaque, URL-safe paste identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PasteId(String);

impl PasteId {
    /// Validate an identifier received from outside the process.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        if value.is_empty() {
            return Err(DomainError::validation("paste id must not be empty"));
        }
        if value.len() > PASTE_ID_MAX_LEN {
            return Err(DomainError::validation(format!(
                "paste id exceeds {PASTE_ID_MAX_LEN} characters"
            )));
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(DomainError::validation(format!(
                "paste id `{value}` contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// Wrap an id produced in-process from the URL-safe alphabet.
    pub(crate) fn from_trusted(value: String) -> Self {
        debug_assert!(Self::parse(&value).is_ok(), "generated id `{value}` is invalid");
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PasteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PasteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PasteId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PasteId> for String {
    fn from(id: PasteId) -> Self {
        id.0
    }
}

/// Descriptive record stored alongside a paste's raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteMeta {
    #[serde(default = "current_version")]
    pub version: u32,
    pub paste_id: PasteId,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_dt: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expire_dt: Option<OffsetDateTime>,
    #[serde(default)]
    pub lexer_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
}

fn current_version() -> u32 {
    CURRENT_PASTE_META_VERSION
}

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default = "current_version")]
    version: u32,
}

impl PasteMeta {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expire_dt.is_some_and(|expire_dt| expire_dt < now)
    }

    /// Time remaining until expiry, negative once expired; `None` when no expiry is set.
    pub fn until_expiry(&self) -> Option<Duration> {
        self.until_expiry_at(OffsetDateTime::now_utc())
    }

    pub fn until_expiry_at(&self, now: OffsetDateTime) -> Option<Duration> {
        self.expire_dt.map(|expire_dt| expire_dt - now)
    }

    /// An empty hash is treated the same as no hash.
    pub fn is_password_protected(&self) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|hash| !hash.is_empty())
    }

    /// Serialize into the single-line persistence form.
    pub fn to_line(&self) -> Result<String, DomainError> {
        serde_json::to_string(self).map_err(|err| DomainError::meta_unprocessable(err.to_string()))
    }

    /// Parse a persisted meta line, rejecting unsupported format versions.
    pub fn extract_from_line(line: &[u8]) -> Result<Self, DomainError> {
        let header: VersionHeader = serde_json::from_slice(line)
            .map_err(|err| DomainError::meta_unprocessable(err.to_string()))?;
        if header.version != CURRENT_PASTE_META_VERSION {
            return Err(DomainError::MetaVersionInvalid {
                version: header.version,
            });
        }
        serde_json::from_slice(line).map_err(|err| DomainError::meta_unprocessable(err.to_string()))
    }
}

/// Paste settings supplied by the caller; the id is assigned by the handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteMetaToCreate {
    pub expire_dt: Option<OffsetDateTime>,
    pub lexer_name: Option<String>,
    pub title: Option<String>,
    pub password_hash: Option<String>,
}

impl PasteMetaToCreate {
    /// Normalize blank titles away and enforce the title length limit.
    pub fn validate(mut self) -> Result<Self, DomainError> {
        self.title = self
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        if self
            .title
            .as_deref()
            .is_some_and(|title| title.chars().count() > TITLE_MAX_CHARS)
        {
            return Err(DomainError::validation(format!(
                "title must be at most {TITLE_MAX_CHARS} characters"
            )));
        }
        Ok(self)
    }

    pub fn into_meta(self, paste_id: PasteId) -> PasteMeta {
        PasteMeta {
            version: CURRENT_PASTE_META_VERSION,
            paste_id,
            creation_dt: OffsetDateTime::now_utc(),
            expire_dt: self.expire_dt,
            lexer_name: self.lexer_name,
            title: self.title,
            password_hash: self.password_hash,
        }
    }
}

pub type RawStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// Raw paste payload as handed to the durable store.
pub enum RawContent {
    Buffer(Bytes),
    Stream(RawStream),
}

impl RawContent {
    pub fn into_stream(self) -> RawStream {
        match self {
            Self::Buffer(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Self::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for RawContent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for RawContent {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}

impl From<Vec<u8>> for RawContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffer(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for RawContent {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Buffer(Bytes::from_static(bytes))
    }
}

impl From<String> for RawContent {
    fn from(text: String) -> Self {
        Self::Buffer(Bytes::from(text))
    }
}

impl From<RawStream> for RawContent {
    fn from(stream: RawStream) -> Self {
        Self::Stream(stream)
    }
}
