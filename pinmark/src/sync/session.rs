use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};
use tracing::debug;

use super::cursor::PaginationCursor;
use super::engine::{EngineError, SyncEngine};
use super::model::{BookmarkDraft, LocalBookmark, LocalTag};
use super::reconcile::ReconcileDelta;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListingKey {
    All,
    Tag(String),
}

impl ListingKey {
    pub fn from_tag(tag: Option<String>) -> Self {
        match tag {
            Some(tag) if !tag.trim().is_empty() => ListingKey::Tag(tag.trim().to_string()),
            _ => ListingKey::All,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            ListingKey::All => None,
            ListingKey::Tag(tag) => Some(tag),
        }
    }
}

impl fmt::Display for ListingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingKey::All => f.write_str("all"),
            ListingKey::Tag(tag) => write!(f, "tag:{tag}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Applied(ReconcileDelta),
    /// Another pass on the same listing was already running.
    Skipped,
    /// The listing has no further pages.
    Exhausted,
}

struct Listing {
    cursor: Mutex<PaginationCursor>,
    in_flight: AtomicBool,
}

impl Listing {
    fn new() -> Self {
        Self {
            cursor: Mutex::new(PaginationCursor::new()),
            in_flight: AtomicBool::new(false),
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serializes every cache mutation behind one writer lock and keeps an
/// independent cursor per listing.
pub struct SyncSession {
    engine: Arc<SyncEngine>,
    writer: Mutex<()>,
    listings: Mutex<HashMap<ListingKey, Arc<Listing>>>,
    revision: watch::Sender<u64>,
}

impl SyncSession {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            engine,
            writer: Mutex::new(()),
            listings: Mutex::new(HashMap::new()),
            revision,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Yields the cache revision, bumped after every mutating call.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub async fn cursor(&self, key: &ListingKey) -> PaginationCursor {
        let listing = self.listing(key).await;
        let cursor = *listing.cursor.lock().await;
        cursor
    }

    /// Forgets a listing. A pass still running on it finishes and its cursor is discarded.
    pub async fn close_listing(&self, key: &ListingKey) {
        self.listings.lock().await.remove(key);
    }

    pub async fn refresh(&self, key: &ListingKey) -> Result<PassOutcome, EngineError> {
        let listing = self.listing(key).await;
        let Some(_in_flight) = InFlight::acquire(&listing.in_flight) else {
            debug!(listing = %key, "refresh coalesced with pass in flight");
            return Ok(PassOutcome::Skipped);
        };
        let _writer = self.writer.lock().await;

        let mut cursor = *listing.cursor.lock().await;
        let delta = self.engine.full_refresh(key.tag(), &mut cursor).await?;
        *listing.cursor.lock().await = cursor;
        self.notify_changed();
        Ok(PassOutcome::Applied(delta))
    }

    pub async fn load_more(&self, key: &ListingKey) -> Result<PassOutcome, EngineError> {
        let listing = self.listing(key).await;
        let Some(_in_flight) = InFlight::acquire(&listing.in_flight) else {
            debug!(listing = %key, "load more ignored while pass in flight");
            return Ok(PassOutcome::Skipped);
        };
        let mut cursor = *listing.cursor.lock().await;
        if !cursor.has_more() {
            return Ok(PassOutcome::Exhausted);
        }
        let _writer = self.writer.lock().await;

        let delta = self.engine.load_more(key.tag(), &mut cursor).await?;
        *listing.cursor.lock().await = cursor;
        self.notify_changed();
        Ok(PassOutcome::Applied(delta))
    }

    pub async fn sync_recent(&self, count: u32) -> Result<ReconcileDelta, EngineError> {
        let _writer = self.writer.lock().await;
        let delta = self.engine.sync_recent(count).await?;
        self.notify_changed();
        Ok(delta)
    }

    pub async fn refresh_tags(&self) -> Result<ReconcileDelta, EngineError> {
        let _writer = self.writer.lock().await;
        let delta = self.engine.refresh_tags().await?;
        self.notify_changed();
        Ok(delta)
    }

    /// Cached tags, fetched first if the cache holds none.
    pub async fn tags(&self) -> Result<Vec<LocalTag>, EngineError> {
        {
            let _writer = self.writer.lock().await;
            if self.engine.ensure_tags().await?.is_some() {
                self.notify_changed();
            }
        }
        Ok(self.engine.cache().query_tags().await?)
    }

    pub async fn bookmarks(
        &self,
        key: &ListingKey,
        unread_only: bool,
    ) -> Result<Vec<LocalBookmark>, EngineError> {
        let cache = self.engine.cache();
        let mut bookmarks = match (key.tag(), unread_only) {
            (Some(tag), _) => cache.query_by_tag(tag).await?,
            (None, true) => cache.query_by_read_state(true).await?,
            (None, false) => cache.query_all().await?,
        };
        if unread_only && key.tag().is_some() {
            bookmarks.retain(|b| b.unread);
        }
        Ok(bookmarks)
    }

    pub async fn add_bookmark(&self, draft: BookmarkDraft) -> Result<LocalBookmark, EngineError> {
        let _writer = self.writer.lock().await;
        let bookmark = self.engine.add_bookmark(draft).await?;
        self.notify_changed();
        Ok(bookmark)
    }

    pub async fn update_bookmark(
        &self,
        remote_id: &str,
        draft: BookmarkDraft,
    ) -> Result<LocalBookmark, EngineError> {
        let _writer = self.writer.lock().await;
        let bookmark = self.engine.update_bookmark(remote_id, draft).await?;
        self.notify_changed();
        Ok(bookmark)
    }

    pub async fn toggle_read(&self, remote_id: &str) -> Result<LocalBookmark, EngineError> {
        let _writer = self.writer.lock().await;
        let bookmark = self.engine.toggle_read(remote_id).await?;
        self.notify_changed();
        Ok(bookmark)
    }

    pub async fn delete_bookmark(&self, remote_id: &str) -> Result<(), EngineError> {
        let _writer = self.writer.lock().await;
        self.engine.delete_bookmark(remote_id).await?;
        self.notify_changed();
        Ok(())
    }

    /// Drops all cached data and every listing cursor.
    pub async fn clear_local_data(&self) -> Result<(), EngineError> {
        let _writer = self.writer.lock().await;
        self.engine.cache().clear().await?;
        self.listings.lock().await.clear();
        self.notify_changed();
        Ok(())
    }

    async fn listing(&self, key: &ListingKey) -> Arc<Listing> {
        let mut listings = self.listings.lock().await;
        Arc::clone(
            listings
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Listing::new())),
        )
    }

    fn notify_changed(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
