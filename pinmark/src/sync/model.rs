use pinboard_core::{PostInput, ReadState, RemoteBookmark, Visibility, split_tags};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

#[derive(Debug, Error)]
#[error("invalid timestamp {value:?}: {source}")]
pub struct TimestampError {
    value: String,
    #[source]
    source: time::error::Parse,
}

/// Parses an RFC 3339 timestamp into unix seconds.
pub fn parse_timestamp(value: &str) -> Result<i64, TimestampError> {
    OffsetDateTime::parse(value.trim(), &Rfc3339)
        .map(OffsetDateTime::unix_timestamp)
        .map_err(|source| TimestampError {
            value: value.to_string(),
            source,
        })
}

pub fn format_timestamp(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| unix.to_string())
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// The remote identifies a post by the MD5 of its URL.
pub fn remote_id_for_url(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalBookmark {
    pub remote_id: String,
    pub url: String,
    pub title: String,
    pub note: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_private: bool,
    pub unread: bool,
}

impl LocalBookmark {
    /// Builds the cached form of a fetched record. `updated_at` mirrors `created_at`.
    pub fn from_remote(remote: &RemoteBookmark) -> Self {
        let created_at = match parse_timestamp(&remote.created_at) {
            Ok(ts) => ts,
            Err(err) => {
                warn!(remote_id = %remote.remote_id, error = %err, "using current time for unparseable creation time");
                now_unix()
            }
        };
        Self {
            remote_id: remote.remote_id.clone(),
            url: remote.url.clone(),
            title: remote.title.clone(),
            note: remote.note.clone(),
            tags: split_tags(&remote.tag_string),
            created_at,
            updated_at: created_at,
            is_private: remote.visibility.is_private(),
            unread: remote.read_state.is_unread(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn read_state(&self) -> ReadState {
        ReadState::from_unread(self.unread)
    }

    pub fn to_post_input(&self) -> PostInput {
        PostInput {
            url: self.url.clone(),
            title: self.title.clone(),
            note: self.note.clone(),
            tags: self.tags.clone(),
            visibility: Visibility::from_private(self.is_private),
            read_state: self.read_state(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalTag {
    pub name: String,
    pub count: i64,
}

/// User-editable fields of a bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookmarkDraft {
    pub url: String,
    pub title: String,
    pub note: String,
    pub tags: Vec<String>,
    pub is_private: bool,
    pub unread: bool,
}

impl BookmarkDraft {
    pub fn from_bookmark(bookmark: &LocalBookmark) -> Self {
        Self {
            url: bookmark.url.clone(),
            title: bookmark.title.clone(),
            note: bookmark.note.clone(),
            tags: bookmark.tags.clone(),
            is_private: bookmark.is_private,
            unread: bookmark.unread,
        }
    }

    pub fn to_post_input(&self) -> PostInput {
        PostInput {
            url: self.url.clone(),
            title: self.title.clone(),
            note: self.note.clone(),
            tags: self.tags.clone(),
            visibility: Visibility::from_private(self.is_private),
            read_state: ReadState::from_unread(self.unread),
        }
    }

    pub fn into_bookmark(self, remote_id: String, created_at: i64, updated_at: i64) -> LocalBookmark {
        LocalBookmark {
            remote_id,
            url: self.url,
            title: self.title,
            note: self.note,
            tags: self.tags,
            created_at,
            updated_at,
            is_private: self.is_private,
            unread: self.unread,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(time: &str) -> RemoteBookmark {
        RemoteBookmark {
            remote_id: "abc".into(),
            url: "https://example.com".into(),
            title: "Example".into(),
            note: "".into(),
            tag_string: "foo bar  baz".into(),
            created_at: time.into(),
            visibility: Visibility::Private,
            read_state: ReadState::Unread,
        }
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        assert_eq!(parse_timestamp("2024-01-01T00:00:00Z").unwrap(), 1_704_067_200);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn converts_remote_record() {
        let local = LocalBookmark::from_remote(&remote("2024-01-01T00:00:00Z"));
        assert_eq!(local.tags, vec!["foo", "bar", "baz"]);
        assert_eq!(local.created_at, 1_704_067_200);
        assert_eq!(local.updated_at, local.created_at);
        assert!(local.is_private);
        assert!(local.unread);
        assert!(local.has_tag("bar"));
        assert!(!local.has_tag("ba"));
    }

    #[test]
    fn unparseable_creation_time_falls_back_to_now() {
        let before = now_unix();
        let local = LocalBookmark::from_remote(&remote("not a date"));
        assert!(local.created_at >= before);
    }

    #[test]
    fn remote_id_is_md5_of_url() {
        assert_eq!(
            remote_id_for_url("https://example.com"),
            "c984d06aafbecf6bc55569f964148ea3"
        );
    }

    #[test]
    fn formats_unix_timestamp() {
        assert_eq!(format_timestamp(1_704_067_200), "2024-01-01T00:00:00Z");
    }
}
