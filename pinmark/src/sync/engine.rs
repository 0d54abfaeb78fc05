use std::collections::HashSet;

use pinboard_core::{PinboardClient, PinboardError, clamp_page_size};
use thiserror::Error;
use tracing::{debug, info};

use super::cache::{CacheError, CacheStore, UpsertOutcome};
use super::cursor::PaginationCursor;
use super::model::{BookmarkDraft, LocalBookmark, LocalTag, now_unix, remote_id_for_url};
use super::reconcile::{DateWindow, ReconcileDelta, stale_after_first_page};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("remote error: {0}")]
    Remote(#[from] PinboardError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("bookmark not found: {0}")]
    MissingBookmark(String),
    #[error("invalid bookmark url {0:?}")]
    InvalidUrl(String),
}

/// Reconciles remote pages into the local cache.
///
/// Every pass fetches before it writes, so a failed fetch leaves the cache
/// and the caller's cursor untouched.
pub struct SyncEngine {
    client: PinboardClient,
    cache: CacheStore,
    page_size: u32,
}

impl SyncEngine {
    pub fn new(client: PinboardClient, cache: CacheStore) -> Self {
        Self {
            client,
            cache,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = clamp_page_size(page_size);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Fetches the first page, drops local records the page proves deleted,
    /// upserts the page and restarts `cursor` after it.
    pub async fn full_refresh(
        &self,
        tag: Option<&str>,
        cursor: &mut PaginationCursor,
    ) -> Result<ReconcileDelta, EngineError> {
        let batch = self.fetch_page(0, tag).await?;
        let oldest = DateWindow::of(&batch).map_or(i64::MIN, |w| w.oldest);
        let candidates = self.cache.query_created_since(oldest, tag).await?;

        let mut delta = ReconcileDelta {
            fetched: batch.len(),
            ..ReconcileDelta::default()
        };
        for stale in stale_after_first_page(&batch, &candidates) {
            debug!(remote_id = %stale.remote_id, created_at = stale.created_at, "dropping bookmark absent from first page");
            if self.cache.delete_bookmark(&stale.remote_id).await? {
                delta.deleted += 1;
            }
        }
        self.upsert_batch(&batch, &mut delta).await?;

        cursor.reset();
        cursor.advance(batch.len(), self.page_size);
        info!(
            tag,
            fetched = delta.fetched,
            inserted = delta.inserted,
            updated = delta.updated,
            unchanged = delta.unchanged,
            deleted = delta.deleted,
            offset = cursor.offset(),
            has_more = cursor.has_more(),
            "full refresh applied"
        );
        Ok(delta)
    }

    /// Appends the page at `cursor`. Absence proves nothing here, so nothing is deleted.
    pub async fn load_more(
        &self,
        tag: Option<&str>,
        cursor: &mut PaginationCursor,
    ) -> Result<ReconcileDelta, EngineError> {
        if !cursor.has_more() {
            return Ok(ReconcileDelta::default());
        }
        let batch = self.fetch_page(cursor.offset(), tag).await?;
        let mut delta = ReconcileDelta {
            fetched: batch.len(),
            ..ReconcileDelta::default()
        };
        self.upsert_batch(&batch, &mut delta).await?;

        cursor.advance(batch.len(), self.page_size);
        info!(
            tag,
            fetched = delta.fetched,
            inserted = delta.inserted,
            updated = delta.updated,
            offset = cursor.offset(),
            has_more = cursor.has_more(),
            "load more applied"
        );
        Ok(delta)
    }

    /// Upserts the most recent posts without any deletion inference.
    pub async fn sync_recent(&self, count: u32) -> Result<ReconcileDelta, EngineError> {
        let recent = self.client.recent_posts(count).await?;
        let batch: Vec<_> = recent.posts.iter().map(LocalBookmark::from_remote).collect();
        let mut delta = ReconcileDelta {
            fetched: batch.len(),
            ..ReconcileDelta::default()
        };
        self.upsert_batch(&batch, &mut delta).await?;
        info!(fetched = delta.fetched, inserted = delta.inserted, updated = delta.updated, "recent posts applied");
        Ok(delta)
    }

    /// Mirrors the complete remote tag set into the cache.
    pub async fn refresh_tags(&self) -> Result<ReconcileDelta, EngineError> {
        let remote = self.client.get_tags().await?;
        let mut delta = ReconcileDelta {
            fetched: remote.len(),
            ..ReconcileDelta::default()
        };

        for local in self.cache.query_tags().await? {
            if !remote.contains_key(&local.name) && self.cache.delete_tag(&local.name).await? {
                delta.deleted += 1;
            }
        }
        for (name, count) in remote {
            let tag = LocalTag {
                name,
                count: i64::try_from(count).unwrap_or(i64::MAX),
            };
            record(&mut delta, self.cache.upsert_tag(&tag).await?);
        }
        info!(
            fetched = delta.fetched,
            inserted = delta.inserted,
            updated = delta.updated,
            deleted = delta.deleted,
            "tags mirrored"
        );
        Ok(delta)
    }

    /// Runs a tag refresh only when nothing is cached yet.
    pub async fn ensure_tags(&self) -> Result<Option<ReconcileDelta>, EngineError> {
        if self.cache.count_tags().await? > 0 {
            return Ok(None);
        }
        self.refresh_tags().await.map(Some)
    }

    pub async fn add_bookmark(&self, draft: BookmarkDraft) -> Result<LocalBookmark, EngineError> {
        validate_url(&draft.url)?;
        self.client.add_post(&draft.to_post_input()).await?;
        let now = now_unix();
        let remote_id = remote_id_for_url(&draft.url);
        let bookmark = draft.into_bookmark(remote_id, now, now);
        self.cache.upsert_bookmark(&bookmark).await?;
        info!(remote_id = %bookmark.remote_id, "bookmark added");
        Ok(bookmark)
    }

    /// Saves user edits. A changed URL replaces the remote post.
    pub async fn update_bookmark(
        &self,
        remote_id: &str,
        draft: BookmarkDraft,
    ) -> Result<LocalBookmark, EngineError> {
        validate_url(&draft.url)?;
        let existing = self.require(remote_id).await?;
        let now = now_unix();

        if draft.url == existing.url {
            self.client.add_post(&draft.to_post_input()).await?;
            let bookmark = draft.into_bookmark(existing.remote_id, existing.created_at, now);
            self.cache.upsert_bookmark(&bookmark).await?;
            info!(remote_id = %bookmark.remote_id, "bookmark updated");
            return Ok(bookmark);
        }

        self.client.add_post(&draft.to_post_input()).await?;
        self.client.delete_post(&existing.url).await?;
        let new_id = remote_id_for_url(&draft.url);
        let bookmark = draft.into_bookmark(new_id, now, now);
        self.cache.delete_bookmark(&existing.remote_id).await?;
        self.cache.upsert_bookmark(&bookmark).await?;
        info!(old = %existing.remote_id, new = %bookmark.remote_id, "bookmark moved to new url");
        Ok(bookmark)
    }

    pub async fn set_read_state(
        &self,
        remote_id: &str,
        unread: bool,
    ) -> Result<LocalBookmark, EngineError> {
        let mut bookmark = self.require(remote_id).await?;
        bookmark.unread = unread;
        self.client.add_post(&bookmark.to_post_input()).await?;
        bookmark.updated_at = now_unix();
        self.cache.upsert_bookmark(&bookmark).await?;
        debug!(remote_id, unread, "read state saved");
        Ok(bookmark)
    }

    pub async fn toggle_read(&self, remote_id: &str) -> Result<LocalBookmark, EngineError> {
        let current = self.require(remote_id).await?;
        self.set_read_state(remote_id, !current.unread).await
    }

    pub async fn delete_bookmark(&self, remote_id: &str) -> Result<(), EngineError> {
        let existing = self.require(remote_id).await?;
        self.client.delete_post(&existing.url).await?;
        self.cache.delete_bookmark(remote_id).await?;
        info!(remote_id, "bookmark deleted");
        Ok(())
    }

    async fn require(&self, remote_id: &str) -> Result<LocalBookmark, EngineError> {
        self.cache
            .get_bookmark(remote_id)
            .await?
            .ok_or_else(|| EngineError::MissingBookmark(remote_id.to_string()))
    }

    async fn fetch_page(
        &self,
        offset: u32,
        tag: Option<&str>,
    ) -> Result<Vec<LocalBookmark>, EngineError> {
        let posts = self.client.list_posts(offset, self.page_size, tag).await?;
        Ok(posts.iter().map(LocalBookmark::from_remote).collect())
    }

    async fn upsert_batch(
        &self,
        batch: &[LocalBookmark],
        delta: &mut ReconcileDelta,
    ) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for bookmark in batch {
            if !seen.insert(bookmark.remote_id.as_str()) {
                continue;
            }
            record(delta, self.cache.upsert_bookmark(bookmark).await?);
        }
        Ok(())
    }
}

fn record(delta: &mut ReconcileDelta, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Inserted => delta.inserted += 1,
        UpsertOutcome::Updated => delta.updated += 1,
        UpsertOutcome::Unchanged => delta.unchanged += 1,
    }
}

fn validate_url(value: &str) -> Result<(), EngineError> {
    match url::Url::parse(value) {
        Ok(parsed) if parsed.has_host() => Ok(()),
        _ => Err(EngineError::InvalidUrl(value.to_string())),
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
