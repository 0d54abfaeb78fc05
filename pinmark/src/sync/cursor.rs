/// Offset/has-more state of one listing. Plain state, no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    offset: u32,
    has_more: bool,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationCursor {
    pub fn new() -> Self {
        Self {
            offset: 0,
            has_more: true,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Records a fetched batch. Only a short batch ends the listing.
    pub fn advance(&mut self, batch_size: usize, page_size: u32) {
        let batch_size = u32::try_from(batch_size).unwrap_or(u32::MAX);
        self.offset = self.offset.saturating_add(batch_size);
        self.has_more = batch_size >= page_size;
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }
}
