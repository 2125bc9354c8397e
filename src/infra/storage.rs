//! Filesystem-backed durable paste store.
//!
//! Layout: `<root>/<shard>/<paste id>/{raw,meta}` where `shard` is the first
//! two characters of the id. Both files are written to a temporary name and
//! renamed into place, raw first, so a paste becomes visible only once its
//! meta file exists.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::repos::{PasteIdStream, PasteStore, StorageError};
use crate::domain::paste::{PasteId, PasteMeta, RawContent};

const RAW_FILE: &str = "raw";
const META_FILE: &str = "meta";

#[derive(Debug, Clone)]
pub struct FsPasteStore {
    root: PathBuf,
}

impl FsPasteStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paste_dir(&self, paste_id: &PasteId) -> PathBuf {
        let id = paste_id.as_str();
        let shard = id.get(..2).unwrap_or(id);
        self.root.join(shard).join(id)
    }

    async fn write_raw(&self, target: &Path, raw: RawContent) -> Result<(), StorageError> {
        let temp = temp_path(target);
        let mut file = fs::File::create(&temp).await?;
        let mut stream = raw.into_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&temp).await;
                    return Err(StorageError::Io(err));
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                drop(file);
                let _ = fs::remove_file(&temp).await;
                return Err(StorageError::Io(err));
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, target).await?;
        Ok(())
    }

    async fn write_meta(&self, target: &Path, meta: &PasteMeta) -> Result<(), StorageError> {
        let mut line = meta.to_line()?;
        line.push('\n');
        let temp = temp_path(target);
        if let Err(err) = fs::write(&temp, line.as_bytes()).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::Io(err));
        }
        fs::rename(&temp, target).await?;
        Ok(())
    }
}

#[async_trait]
impl PasteStore for FsPasteStore {
    async fn write_paste(
        &self,
        paste_id: &PasteId,
        raw: RawContent,
        meta: &PasteMeta,
    ) -> Result<(), StorageError> {
        let dir = self.paste_dir(paste_id);
        fs::create_dir_all(&dir).await?;

        let result = match self.write_raw(&dir.join(RAW_FILE), raw).await {
            Ok(()) => self.write_meta(&dir.join(META_FILE), meta).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_dir_all(&dir).await {
                warn!(
                    paste_id = %paste_id,
                    error = %cleanup,
                    "Failed to clean up partially written paste"
                );
            }
            return Err(err);
        }

        debug!(paste_id = %paste_id, path = %dir.display(), "Paste persisted");
        Ok(())
    }

    async fn read_paste_meta(&self, paste_id: &PasteId) -> Result<Option<PasteMeta>, StorageError> {
        let path = self.paste_dir(paste_id).join(META_FILE);
        let line = match fs::read(&path).await {
            Ok(line) => line,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };

        let meta = PasteMeta::extract_from_line(line.trim_ascii_end())?;
        if &meta.paste_id != paste_id {
            return Err(StorageError::corrupt(format!(
                "meta at {} names paste `{}`",
                path.display(),
                meta.paste_id
            )));
        }
        Ok(Some(meta))
    }

    async fn read_paste_raw(&self, paste_id: &PasteId) -> Result<Option<Bytes>, StorageError> {
        let path = self.paste_dir(paste_id).join(RAW_FILE);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn delete_paste(&self, paste_id: &PasteId) -> Result<(), StorageError> {
        let dir = self.paste_dir(paste_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(paste_id = %paste_id, "Paste deleted from storage");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }

        // Drop the shard directory once empty; a concurrent write may refill it.
        if let Some(shard) = dir.parent() {
            let _ = fs::remove_dir(shard).await;
        }
        Ok(())
    }

    fn read_all_paste_ids(&self) -> PasteIdStream {
        let root = self.root.clone();
        let stream = try_stream! {
            let mut shards = match fs::read_dir(&root).await {
                Ok(shards) => Some(shards),
                Err(err) if err.kind() == ErrorKind::NotFound => None,
                Err(err) => Err(StorageError::Io(err))?,
            };

            while let Some(shard) = next_entry(shards.as_mut()).await? {
                if !shard.file_type().await?.is_dir() {
                    continue;
                }
                let mut entries = match fs::read_dir(shard.path()).await {
                    Ok(entries) => entries,
                    // Shard removed by a concurrent delete.
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => Err(StorageError::Io(err))?,
                };

                while let Some(entry) = entries.next_entry().await? {
                    let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                        continue;
                    };
                    let Ok(paste_id) = PasteId::parse(&name) else {
                        continue;
                    };
                    if fs::try_exists(entry.path().join(META_FILE)).await? {
                        yield paste_id;
                    }
                }
            }
        };
        stream.boxed()
    }
}

async fn next_entry(
    dir: Option<&mut fs::ReadDir>,
) -> Result<Option<fs::DirEntry>, StorageError> {
    match dir {
        Some(dir) => Ok(dir.next_entry().await?),
        None => Ok(None),
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("paste");
    target.with_file_name(format!(".{name}.tmp-{}", Uuid::new_v4().simple()))
}
