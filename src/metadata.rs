#![forbid(unsafe_code)]

//! Metadata collaborator: the records the rest of the crate consumes and the
//! YouTube Data API client that produces them.
//!
//! The client only knows how to fetch one page (or one video); continuation
//! bookkeeping lives in [`crate::walker`].

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Privacy status as reported by the API. `Unknown` covers a missing status
/// block, which is what deleted or region-blocked entries look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    Unlisted,
    Unknown,
}

impl Visibility {
    pub fn from_privacy_status(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("public") => Self::Public,
            Some("private") => Self::Private,
            Some("unlisted") => Self::Unlisted,
            _ => Self::Unknown,
        }
    }
}

/// One entry as returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    pub id: String,
    pub title: String,
    pub content_video_id: Option<String>,
    pub visibility: Visibility,
}

/// A single page of a playlist listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPage {
    pub items: Vec<MetadataItem>,
    pub next_cursor: Option<String>,
}

/// A video as seen by the downloader. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub id: String,
    pub raw_title: String,
    pub visibility: Visibility,
}

impl VideoRecord {
    pub fn new(id: impl Into<String>, raw_title: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            id: id.into(),
            raw_title: raw_title.into(),
            visibility,
        }
    }

    /// Playlist items carry their own id; the video id is in
    /// `content_video_id`. Video lookups only have `id`.
    pub fn from_item(item: MetadataItem) -> Self {
        let id = item
            .content_video_id
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(item.id);
        Self {
            id,
            raw_title: item.title,
            visibility: item.visibility,
        }
    }

    pub fn watch_url(&self) -> String {
        watch_url(&self.id)
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Anything able to list playlist pages and look up single videos.
pub trait MetadataSource {
    fn playlist_page(
        &self,
        playlist_id: &str,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<MetadataPage>;

    /// `Ok(None)` when the service does not know the video.
    fn video(&self, video_id: &str) -> Result<Option<MetadataItem>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiItem {
    #[serde(default)]
    id: String,
    snippet: Option<Snippet>,
    content_details: Option<ContentDetails>,
    status: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    privacy_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl From<ApiItem> for MetadataItem {
    fn from(item: ApiItem) -> Self {
        Self {
            id: item.id,
            title: item.snippet.map(|snippet| snippet.title).unwrap_or_default(),
            content_video_id: item.content_details.and_then(|details| details.video_id),
            visibility: Visibility::from_privacy_status(
                item.status
                    .as_ref()
                    .and_then(|status| status.privacy_status.as_deref()),
            ),
        }
    }
}

impl From<ListResponse> for MetadataPage {
    fn from(response: ListResponse) -> Self {
        Self {
            items: response.items.into_iter().map(MetadataItem::from).collect(),
            next_cursor: response
                .next_page_token
                .filter(|token| !token.is_empty()),
        }
    }
}

/// Blocking client for the YouTube Data API v3.
pub struct YouTubeDataApi {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
}

impl YouTubeDataApi {
    pub fn new(api_key: Option<&str>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_API_BASE)
    }

    pub fn with_base_url(api_key: Option<&str>, base_url: &str) -> Result<Self> {
        let api_key = api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::ServiceInit("YOUTUBE_API_KEY is not set".into()))?;
        let base_url = base_url.trim().trim_end_matches('/');
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::ServiceInit(format!(
                "API base URL must be http(s): {base_url}"
            )));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(30))
            .build();

        Ok(Self {
            agent,
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
        })
    }

    fn list(&self, what: &str, request: ureq::Request) -> Result<ListResponse> {
        let response = request
            .query("key", &self.api_key)
            .call()
            .map_err(|err| fetch_error(what, err))?;
        response.into_json().map_err(|err| Error::FetchFailed {
            what: what.to_string(),
            message: format!("invalid response body: {err}"),
        })
    }
}

impl MetadataSource for YouTubeDataApi {
    fn playlist_page(
        &self,
        playlist_id: &str,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<MetadataPage> {
        debug!(playlist_id, page_size, cursor = ?cursor, "requesting playlist page");
        let mut request = self
            .agent
            .get(&format!("{}/playlistItems", self.base_url))
            .query("part", "snippet,contentDetails,status")
            .query("maxResults", &page_size.to_string())
            .query("playlistId", playlist_id);
        if let Some(cursor) = cursor {
            request = request.query("pageToken", cursor);
        }
        let what = format!("playlist {playlist_id}");
        Ok(self.list(&what, request)?.into())
    }

    fn video(&self, video_id: &str) -> Result<Option<MetadataItem>> {
        debug!(video_id, "requesting video");
        let request = self
            .agent
            .get(&format!("{}/videos", self.base_url))
            .query("part", "snippet,status")
            .query("id", video_id);
        let what = format!("video {video_id}");
        let response = self.list(&what, request)?;
        Ok(response.items.into_iter().next().map(MetadataItem::from))
    }
}

fn fetch_error(what: &str, err: ureq::Error) -> Error {
    let message = match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            match api_error_message(&body) {
                Some(detail) => format!("HTTP {code}: {detail}"),
                None => format!("HTTP {code}"),
            }
        }
        ureq::Error::Transport(transport) => format!("transport error: {transport}"),
    };
    Error::FetchFailed {
        what: what.to_string(),
        message,
    }
}

fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.message)
        .filter(|message| !message.is_empty())
}
