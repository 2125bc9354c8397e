//! Expiry gate applied by callers before serving a paste.
//!
//! The handler never checks expiry itself. Any path that observes an expired
//! paste goes through here so the paste is scheduled for removal before "not
//! found" is reported.

use bytes::Bytes;
use futures::StreamExt;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::error::PasteHandlerError;
use crate::application::paste::PasteHandler;
use crate::domain::paste::{PasteId, PasteMeta};

/// Result of sweeping the store for expired pastes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Ids listed by the store.
    pub scanned: u64,
    /// Expired pastes whose removal was scheduled. The durable delete runs in
    /// the background; if it fails later it is escalated through the fault
    /// channel and is still counted here.
    pub removed: u64,
    /// Ids whose metadata could not be loaded.
    pub failed: u64,
}

#[derive(Clone)]
pub struct PasteAccess {
    handler: PasteHandler,
}

impl PasteAccess {
    pub fn new(handler: PasteHandler) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &PasteHandler {
        &self.handler
    }

    /// Live metadata, or `None` when missing or expired.
    pub async fn meta(&self, paste_id: &PasteId) -> Result<Option<PasteMeta>, PasteHandlerError> {
        let Some(meta) = self.handler.get_paste_meta(paste_id).await? else {
            return Ok(None);
        };
        if meta.is_expired() {
            info!(paste_id = %paste_id, "Paste expired; scheduling removal");
            self.handler.remove_paste(paste_id);
            return Ok(None);
        }
        Ok(Some(meta))
    }

    pub async fn raw(&self, paste_id: &PasteId) -> Result<Option<Bytes>, PasteHandlerError> {
        if self.meta(paste_id).await?.is_none() {
            return Ok(None);
        }
        self.handler.get_paste_raw(paste_id).await
    }

    pub async fn rendered(
        &self,
        paste_id: &PasteId,
        custom_lexer: Option<&str>,
    ) -> Result<Option<String>, PasteHandlerError> {
        if self.meta(paste_id).await?.is_none() {
            return Ok(None);
        }
        self.handler
            .get_paste_rendered(paste_id, custom_lexer)
            .await
    }

    /// Walk every stored id and schedule removal of the expired ones.
    ///
    /// Ids that fail to load are counted and skipped so one bad record does not
    /// stop the sweep; a failure of the enumeration itself aborts it.
    pub async fn purge_expired(&self) -> Result<PurgeReport, PasteHandlerError> {
        let now = OffsetDateTime::now_utc();
        let mut report = PurgeReport::default();
        let mut ids = self.handler.all_paste_ids();

        while let Some(paste_id) = ids.next().await {
            let paste_id = paste_id.map_err(PasteHandlerError::Storage)?;
            report.scanned += 1;
            match self.handler.get_paste_meta(&paste_id).await {
                Ok(Some(meta)) if meta.is_expired_at(now) => {
                    self.handler.remove_paste(&paste_id);
                    report.removed += 1;
                }
                // Live, or removed concurrently since the walk listed it.
                Ok(_) => {}
                Err(err) => {
                    warn!(paste_id = %paste_id, error = %err, "Skipping paste during purge");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            removed = report.removed,
            failed = report.failed,
            "Expired paste purge finished"
        );
        Ok(report)
    }
}
