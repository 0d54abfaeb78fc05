mod client;
mod tags;
mod token;

pub use client::{
    DEFAULT_TIMEOUT, ErrorClass, MAX_PAGE_SIZE, MAX_RECENT_COUNT, PinboardClient, PinboardError,
    PostInput, ReadState, RecentPosts, RemoteBookmark, TagCounts, Visibility, clamp_page_size,
};
pub use tags::{join_tags, split_tags};
pub use token::{AuthToken, TokenError};
