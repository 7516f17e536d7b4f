use std::sync::LazyLock;

use crate::models::{ChannelStats, VideoStats};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use ureq::{Agent, Body};

const VIDEOS_API: &str = "https://www.googleapis.com/youtube/v3/videos";
const CHANNELS_API: &str = "https://www.googleapis.com/youtube/v3/channels";
const SEARCH_API: &str = "https://www.googleapis.com/youtube/v3/search";
const UPLOAD_API: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const THUMBNAILS_API: &str = "https://www.googleapis.com/upload/youtube/v3/thumbnails/set";

/// Maximum number of results per search page (YouTube API limit).
pub const PAGE_SIZE: usize = 50;

/// Resource parts written when a video is created.
pub const INSERT_PARTS: &str = "snippet,status,recordingDetails";

/// Regex for the `Range` header of a 308 Resume Incomplete response (e.g. bytes=0-1048575).
static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bytes=\d+-(\d+)$").expect("static regex"));

/// Where a resumable upload stands after a chunk was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStatus {
    Incomplete { next_offset: u64 },
    Complete { video_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOrder {
    Date,
    Relevance,
}

impl SearchOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchOrder::Date => "date",
            SearchOrder::Relevance => "relevance",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub video_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// The subset of the YouTube Data API v3 this tool talks to.
pub trait YouTubeApi {
    /// Opens a resumable upload session for a new video and returns its session URL.
    fn start_upload(&self, body: &Value, content_length: u64) -> Result<String>;

    /// Sends `chunk`, which starts at byte `offset` of a `total`-byte file.
    fn upload_chunk(
        &self,
        session_url: &str,
        chunk: &[u8],
        offset: u64,
        total: u64,
    ) -> Result<ChunkStatus>;

    /// Overwrites the snippet of the video identified by `body["id"]`.
    fn update_video(&self, body: &Value) -> Result<()>;

    fn video_snippet(&self, video_id: &str) -> Result<Snippet>;

    fn set_thumbnail(&self, video_id: &str, image: &[u8], mime_type: &str) -> Result<()>;

    /// Statistics of the authenticated user's channel, `None` if there is no channel.
    fn channel_statistics(&self) -> Result<Option<ChannelStats>>;

    fn channel_id(&self) -> Result<Option<String>>;

    fn search_videos(
        &self,
        channel_id: &str,
        order: SearchOrder,
        page_token: Option<&str>,
    ) -> Result<SearchPage>;

    fn video_statistics(&self, ids: &[String]) -> Result<Vec<VideoStats>>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
}

#[derive(Debug, Deserialize)]
struct SearchId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    snippet: VideoSnippet,
    #[serde(default)]
    statistics: VideoStatistics,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoStatistics {
    #[serde(rename = "viewCount")]
    view_count: Option<String>,
    #[serde(rename = "likeCount")]
    like_count: Option<String>,
    #[serde(rename = "commentCount")]
    comment_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    #[serde(default)]
    statistics: ChannelStatistics,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelStatistics {
    #[serde(rename = "subscriberCount")]
    subscriber_count: Option<String>,
    #[serde(rename = "viewCount")]
    view_count: Option<String>,
    #[serde(rename = "videoCount")]
    video_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Counters arrive as decimal strings; absent or garbled values count as zero.
fn parse_count(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn to_video_stats(item: VideoItem) -> Result<VideoStats> {
    let published_at = item
        .snippet
        .published_at
        .with_context(|| format!("video {} has no publish date", item.id))?;

    Ok(VideoStats {
        title: item.snippet.title,
        views: parse_count(item.statistics.view_count.as_deref()),
        likes: parse_count(item.statistics.like_count.as_deref()),
        comments: parse_count(item.statistics.comment_count.as_deref()),
        published_at,
        id: item.id,
    })
}

/// Pulls `error.message` out of a Google API error body.
fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(String::from)
}

/// Next byte to send according to a 308 response's `Range` header.
fn next_offset_from_range(range: Option<&str>) -> Result<u64> {
    let Some(range) = range else {
        // Nothing persisted yet
        return Ok(0);
    };

    let caps = RANGE_RE
        .captures(range.trim())
        .with_context(|| format!("unexpected Range header '{range}' in upload response"))?;
    let last: u64 = caps[1]
        .parse()
        .with_context(|| format!("invalid Range header '{range}'"))?;
    Ok(last + 1)
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Authenticated client for the YouTube Data API v3.
pub struct Client {
    agent: Agent,
    authorization: String,
}

impl Client {
    pub fn new(access_token: &str) -> Self {
        // Status codes are inspected by hand; 308 is how resumable uploads say "keep going".
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .build();

        Self {
            agent: Agent::new_with_config(config),
            authorization: format!("Bearer {access_token}"),
        }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let mut request = self
            .agent
            .get(url)
            .header("Authorization", &self.authorization);
        for (k, v) in query {
            request = request.query(*k, *v);
        }

        let mut response = check(request.call(), what)?;
        response
            .body_mut()
            .read_json()
            .with_context(|| format!("failed to parse YouTube API response ({what})"))
    }
}

/// Turns transport failures and non-2xx statuses into errors.
fn check(
    result: Result<http::Response<Body>, ureq::Error>,
    what: &str,
) -> Result<http::Response<Body>> {
    let mut response = match result {
        Ok(resp) => resp,
        Err(e) => {
            return Err(anyhow::anyhow!(e).context(format!("failed to reach YouTube API ({what})")));
        }
    };

    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }

    let detail = response
        .body_mut()
        .read_to_string()
        .ok()
        .and_then(|body| api_error_message(&body))
        .map(|m| format!(": {m}"))
        .unwrap_or_default();

    match status {
        401 => bail!(
            "YouTube API rejected the access token while {what} (401){detail}. \
             Run the command again to sign in."
        ),
        403 => bail!(
            "YouTube API returned 403 Forbidden while {what}{detail}. Check that the \
             account granted the requested scopes and the YouTube Data API v3 is enabled."
        ),
        code => bail!("YouTube API returned HTTP {code} while {what}{detail}"),
    }
}

impl YouTubeApi for Client {
    fn start_upload(&self, body: &Value, content_length: u64) -> Result<String> {
        tracing::info!(bytes = content_length, "opening resumable upload session");

        let result = self
            .agent
            .post(UPLOAD_API)
            .query("uploadType", "resumable")
            .query("part", INSERT_PARTS)
            .header("Authorization", &self.authorization)
            .header("X-Upload-Content-Length", content_length.to_string())
            .header("X-Upload-Content-Type", "video/*")
            .send_json(body);
        let response = check(result, "starting the upload")?;

        let session_url = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .context("no upload session URL in YouTube API response")?
            .to_string();

        Ok(session_url)
    }

    fn upload_chunk(
        &self,
        session_url: &str,
        chunk: &[u8],
        offset: u64,
        total: u64,
    ) -> Result<ChunkStatus> {
        let end = offset + chunk.len() as u64 - 1;
        tracing::debug!("uploading bytes {offset}-{end}/{total}");

        let result = self
            .agent
            .put(session_url)
            .header("Authorization", &self.authorization)
            .header("Content-Range", format!("bytes {offset}-{end}/{total}"))
            .header("Content-Type", "video/*")
            .send(chunk);

        // 308 Resume Incomplete = chunk stored, more expected
        if let Ok(response) = &result
            && response.status().as_u16() == 308
        {
            let range = response
                .headers()
                .get("range")
                .and_then(|v| v.to_str().ok());
            let next_offset = next_offset_from_range(range)?;
            return Ok(ChunkStatus::Incomplete { next_offset });
        }

        let mut response = check(result, "uploading the video")?;
        let video: UploadedVideo = response
            .body_mut()
            .read_json()
            .context("failed to parse uploaded video resource")?;

        Ok(ChunkStatus::Complete { video_id: video.id })
    }

    fn update_video(&self, body: &Value) -> Result<()> {
        let result = self
            .agent
            .put(VIDEOS_API)
            .query("part", "snippet")
            .header("Authorization", &self.authorization)
            .send_json(body);
        check(result, "updating the video")?;
        Ok(())
    }

    fn video_snippet(&self, video_id: &str) -> Result<Snippet> {
        let list: ListResponse<VideoItem> = self.get_json(
            VIDEOS_API,
            &[("part", "snippet"), ("id", video_id)],
            "fetching the video snippet",
        )?;

        let item = list
            .items
            .into_iter()
            .next()
            .with_context(|| format!("video {video_id} not found"))?;

        Ok(Snippet {
            title: item.snippet.title,
            description: item.snippet.description,
        })
    }

    fn set_thumbnail(&self, video_id: &str, image: &[u8], mime_type: &str) -> Result<()> {
        let result = self
            .agent
            .post(THUMBNAILS_API)
            .query("videoId", video_id)
            .query("uploadType", "media")
            .header("Authorization", &self.authorization)
            .header("Content-Type", mime_type)
            .send(image);
        check(result, "setting the thumbnail")?;
        Ok(())
    }

    fn channel_statistics(&self) -> Result<Option<ChannelStats>> {
        let list: ListResponse<ChannelItem> = self.get_json(
            CHANNELS_API,
            &[("part", "statistics"), ("mine", "true")],
            "fetching channel statistics",
        )?;

        Ok(list.items.into_iter().next().map(|channel| ChannelStats {
            subscribers: parse_count(channel.statistics.subscriber_count.as_deref()),
            total_views: parse_count(channel.statistics.view_count.as_deref()),
            video_count: parse_count(channel.statistics.video_count.as_deref()),
        }))
    }

    fn channel_id(&self) -> Result<Option<String>> {
        let list: ListResponse<ChannelItem> = self.get_json(
            CHANNELS_API,
            &[("part", "id"), ("mine", "true")],
            "looking up the channel",
        )?;

        Ok(list.items.into_iter().next().map(|c| c.id))
    }

    fn search_videos(
        &self,
        channel_id: &str,
        order: SearchOrder,
        page_token: Option<&str>,
    ) -> Result<SearchPage> {
        let max_results = PAGE_SIZE.to_string();
        let mut query = vec![
            ("part", "id"),
            ("channelId", channel_id),
            ("maxResults", max_results.as_str()),
            ("type", "video"),
            ("order", order.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let list: ListResponse<SearchItem> =
            self.get_json(SEARCH_API, &query, "searching channel videos")?;

        Ok(SearchPage {
            video_ids: list
                .items
                .into_iter()
                .filter_map(|item| item.id.video_id)
                .collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn video_statistics(&self, ids: &[String]) -> Result<Vec<VideoStats>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_param = ids.join(",");
        let list: ListResponse<VideoItem> = self.get_json(
            VIDEOS_API,
            &[("part", "snippet,statistics"), ("id", id_param.as_str())],
            "fetching video statistics",
        )?;

        list.items.into_iter().map(to_video_stats).collect()
    }
}
