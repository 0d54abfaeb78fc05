use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::tags::join_tags;
use crate::token::AuthToken;

const DEFAULT_BASE_URL: &str = "https://api.pinboard.in/v1/";
const RESULT_DONE: &str = "done";

/// Largest `results` value the remote accepts for one page of `posts/all`.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Largest `count` accepted by `posts/recent`.
pub const MAX_RECENT_COUNT: u32 = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub type TagCounts = BTreeMap<String, u64>;

#[derive(Debug, Error)]
pub enum PinboardError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("authentication rejected by the remote service")]
    Auth,
    #[error("api returned {status}: {body}")]
    Server { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("api reported failure: {result_code}")]
    LogicalFailure { result_code: String },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for PinboardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PinboardError::Decode(err.to_string())
        } else {
            PinboardError::Network(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    Auth,
    Server,
    Decode,
}

impl PinboardError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            PinboardError::Network(_) => ErrorClass::Network,
            PinboardError::Auth => ErrorClass::Auth,
            PinboardError::Server { .. } | PinboardError::LogicalFailure { .. } => {
                ErrorClass::Server
            }
            PinboardError::Decode(_) | PinboardError::Url(_) => ErrorClass::Decode,
        }
    }

    /// Only transport failures are worth a manual retry.
    pub fn is_transient(&self) -> bool {
        self.classification() == ErrorClass::Network
    }
}

/// Clamps a requested page size to what the remote accepts.
pub fn clamp_page_size(page_size: u32) -> u32 {
    page_size.clamp(1, MAX_PAGE_SIZE)
}

#[derive(Clone)]
pub struct PinboardClient {
    http: Client,
    base_url: Url,
    token: AuthToken,
}

impl PinboardClient {
    pub fn new(token: AuthToken) -> Result<Self, PinboardError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: AuthToken) -> Result<Self, PinboardError> {
        Self::with_options(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_options(
        base_url: &str,
        token: AuthToken,
        timeout: Duration,
    ) -> Result<Self, PinboardError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PinboardError::Network)?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn username(&self) -> &str {
        self.token.username()
    }

    /// One page of the full corpus, newest first.
    pub async fn list_posts(
        &self,
        offset: u32,
        page_size: u32,
        tag: Option<&str>,
    ) -> Result<Vec<RemoteBookmark>, PinboardError> {
        let mut url = self.endpoint("posts/all")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("start", &offset.to_string())
                .append_pair("results", &clamp_page_size(page_size).to_string());
            if let Some(tag) = tag.filter(|t| !t.is_empty()) {
                query.append_pair("tag", tag);
            }
        }
        debug!(offset, page_size, tag, "fetching posts page");
        let response = self.http.get(url).send().await?;
        Self::read_json(response).await
    }

    pub async fn recent_posts(&self, count: u32) -> Result<RecentPosts, PinboardError> {
        let mut url = self.endpoint("posts/recent")?;
        url.query_pairs_mut()
            .append_pair("count", &count.clamp(1, MAX_RECENT_COUNT).to_string());
        let response = self.http.get(url).send().await?;
        Self::read_json(response).await
    }

    /// Creates or replaces the post keyed by `input.url`.
    pub async fn add_post(&self, input: &PostInput) -> Result<(), PinboardError> {
        let mut url = self.endpoint("posts/add")?;
        url.query_pairs_mut()
            .append_pair("url", &input.url)
            .append_pair("description", &input.title)
            .append_pair("extended", &input.note)
            .append_pair("tags", &join_tags(&input.tags))
            .append_pair("shared", input.visibility.as_flag())
            .append_pair("toread", input.read_state.as_flag())
            .append_pair("replace", "yes");
        let response = self.http.get(url).send().await?;
        let result: ResultCode = Self::read_json(response).await?;
        result.into_result()
    }

    pub async fn delete_post(&self, post_url: &str) -> Result<(), PinboardError> {
        let mut url = self.endpoint("posts/delete")?;
        url.query_pairs_mut().append_pair("url", post_url);
        let response = self.http.get(url).send().await?;
        let result: ResultCode = Self::read_json(response).await?;
        result.into_result()
    }

    /// The complete tag -> usage count mapping. Not paginated.
    pub async fn get_tags(&self) -> Result<TagCounts, PinboardError> {
        let url = self.endpoint("tags/get")?;
        let response = self.http.get(url).send().await?;
        let raw: BTreeMap<String, CountValue> = Self::read_json(response).await?;
        raw.into_iter()
            .map(|(name, count)| count.into_count().map(|count| (name, count)))
            .collect()
    }

    fn endpoint(&self, path: &str) -> Result<Url, PinboardError> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut()
            .append_pair("auth_token", self.token.as_str())
            .append_pair("format", "json");
        Ok(url)
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PinboardError> {
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(PinboardError::Auth);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PinboardError::Server { status, body });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| {
            warn!(error = %err, "discarding malformed response payload");
            PinboardError::Decode(err.to_string())
        })
    }
}

/// A bookmark exactly as the remote reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteBookmark {
    #[serde(rename = "hash")]
    pub remote_id: String,
    #[serde(rename = "href")]
    pub url: String,
    #[serde(rename = "description", default)]
    pub title: String,
    #[serde(rename = "extended", default)]
    pub note: String,
    #[serde(rename = "tags", default)]
    pub tag_string: String,
    #[serde(rename = "time")]
    pub created_at: String,
    #[serde(rename = "shared", default)]
    pub visibility: Visibility,
    #[serde(rename = "toread", default)]
    pub read_state: ReadState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum Visibility {
    #[default]
    #[serde(rename = "yes")]
    Public,
    #[serde(rename = "no")]
    Private,
}

impl Visibility {
    fn as_flag(self) -> &'static str {
        match self {
            Visibility::Public => "yes",
            Visibility::Private => "no",
        }
    }

    pub fn is_private(self) -> bool {
        self == Visibility::Private
    }

    pub fn from_private(is_private: bool) -> Self {
        if is_private {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum ReadState {
    #[default]
    #[serde(rename = "no")]
    Read,
    #[serde(rename = "yes")]
    Unread,
}

impl ReadState {
    fn as_flag(self) -> &'static str {
        match self {
            ReadState::Read => "no",
            ReadState::Unread => "yes",
        }
    }

    pub fn is_unread(self) -> bool {
        self == ReadState::Unread
    }

    pub fn from_unread(unread: bool) -> Self {
        if unread {
            ReadState::Unread
        } else {
            ReadState::Read
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ReadState::Read => ReadState::Unread,
            ReadState::Unread => ReadState::Read,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecentPosts {
    pub date: String,
    pub user: String,
    pub posts: Vec<RemoteBookmark>,
}

/// Outbound payload for `posts/add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostInput {
    pub url: String,
    pub title: String,
    pub note: String,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub read_state: ReadState,
}

#[derive(Debug, Deserialize)]
struct ResultCode {
    result_code: String,
}

impl ResultCode {
    fn into_result(self) -> Result<(), PinboardError> {
        if self.result_code == RESULT_DONE {
            Ok(())
        } else {
            Err(PinboardError::LogicalFailure {
                result_code: self.result_code,
            })
        }
    }
}

// Counts arrive as numbers from some deployments and as strings from others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountValue {
    Number(u64),
    Text(String),
}

impl CountValue {
    fn into_count(self) -> Result<u64, PinboardError> {
        match self {
            CountValue::Number(value) => Ok(value),
            CountValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| PinboardError::Decode(format!("invalid tag count: {text}"))),
        }
    }
}
