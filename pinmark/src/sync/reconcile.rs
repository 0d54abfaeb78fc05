use std::collections::HashSet;

use super::model::LocalBookmark;

/// `[oldest, newest]` creation-time range covered by a fetched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub oldest: i64,
    pub newest: i64,
}

impl DateWindow {
    pub fn of(batch: &[LocalBookmark]) -> Option<Self> {
        let oldest = batch.iter().map(|b| b.created_at).min()?;
        let newest = batch.iter().map(|b| b.created_at).max()?;
        Some(Self { oldest, newest })
    }

    pub fn contains(&self, created_at: i64) -> bool {
        (self.oldest..=self.newest).contains(&created_at)
    }

    /// Inside the window, or claiming to be newer than the newest remote record.
    /// Both cases are decidable from a first-page fetch; older records are not.
    pub fn observes(&self, created_at: i64) -> bool {
        self.contains(created_at) || created_at > self.newest
    }
}

/// Local records a first-page batch proves stale.
///
/// An empty first page means the remote holds nothing in scope, so every
/// local candidate is stale.
pub fn stale_after_first_page<'a>(
    batch: &[LocalBookmark],
    local: &'a [LocalBookmark],
) -> Vec<&'a LocalBookmark> {
    let present: HashSet<&str> = batch.iter().map(|b| b.remote_id.as_str()).collect();
    let window = DateWindow::of(batch);
    local
        .iter()
        .filter(|b| window.is_none_or(|w| w.observes(b.created_at)))
        .filter(|b| !present.contains(b.remote_id.as_str()))
        .collect()
}

/// Per-pass counts, logged once per pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileDelta {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl ReconcileDelta {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0 || self.deleted > 0
    }

    pub fn absorb(&mut self, other: ReconcileDelta) {
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
    }
}
