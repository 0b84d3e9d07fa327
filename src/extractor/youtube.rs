//! YouTube media-info backend, grounded in
//! `original_source/bot/mods/music/extractors/youtube/__init__.py`. §4.8
//! resolves this backend onto a minimal oEmbed-style HTTP lookup through
//! `reqwest` rather than shelling out to `yt-dlp`, since no real
//! yt-dlp-equivalent crate is available and spawning an external tool is
//! out of scope for this exercise.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::models::Track;

const BASE_URL: &str = "https://www.youtube.com/watch?v=";
const OEMBED_URL: &str = "https://www.youtube.com/oembed";

static VIDEO_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Za-z_-]{10}[048AEIMQUYcgkosw]$").expect("valid regex"));

static VIDEO_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?:https?://)?
        (?:
            (?:(?:www\.)?youtube\.com/(?:embed/|watch\?v=))
            |
            (?:(?:m\.|music\.)youtube\.com/watch\?v=)
            |
            (?:youtu\.be/)
        )
        (?P<video_id>[0-9A-Za-z_-]{10}[048AEIMQUYcgkosw])
        .*$
        ",
    )
    .expect("valid regex")
});

#[derive(Debug, Error)]
pub enum YoutubeError {
    #[error("invalid url was provided")]
    InvalidUrl,
    #[error("extractor failed to extract video info")]
    InfoExtraction,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// The subset of a YouTube oEmbed response (`GET /oembed?url=&format=json`)
/// this backend needs. oEmbed carries no duration or raw stream URL — the
/// Non-goals excluding a real media-download pipeline mean `Track` is
/// populated with the watch-page URL as its own `stream_url` (the chat
/// player widget embeds by URL) and `duration_sec` left at `0`.
#[derive(Debug, Deserialize)]
struct OembedResponse {
    title: String,
}

const SEARCH_RESULTS_LIMIT: usize = 3;

static SEARCH_VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""videoId":"([0-9A-Za-z_-]{11})""#).expect("valid regex"));

fn track_for(video_id: &str, title: String) -> Track {
    let origin_url = format!("{BASE_URL}{video_id}");
    Track { title, duration_sec: 0, origin_id: video_id.to_string(), origin_url: origin_url.clone(), stream_url: origin_url }
}

pub struct YoutubeExtractor {
    http: reqwest::Client,
}

impl YoutubeExtractor {
    pub fn new() -> Self {
        YoutubeExtractor { http: reqwest::Client::builder().user_agent("fleetd-extractor").build().expect("building the extractor's http client") }
    }

    fn validate_url(&self, url: &str) -> Result<String, YoutubeError> {
        if VIDEO_URL.is_match(url) {
            Ok(url.to_string())
        } else if VIDEO_ID.is_match(url) {
            Ok(format!("{BASE_URL}{url}"))
        } else {
            Err(YoutubeError::InvalidUrl)
        }
    }

    fn video_id_of(&self, target: &str) -> Option<String> {
        VIDEO_URL.captures(target).map(|caps| caps["video_id"].to_string())
    }

    async fn lookup(&self, watch_url: &str) -> Result<OembedResponse, YoutubeError> {
        let resp = self.http.get(OEMBED_URL).query(&[("url", watch_url), ("format", "json")]).send().await?;
        if !resp.status().is_success() {
            return Err(YoutubeError::InfoExtraction);
        }
        resp.json().await.map_err(|_| YoutubeError::InfoExtraction)
    }

    pub async fn extract(&self, url: &str) -> Result<Track, YoutubeError> {
        let target = self.validate_url(url)?;
        let video_id = self.video_id_of(&target).ok_or(YoutubeError::InvalidUrl)?;
        let info = self.lookup(&target).await?;
        Ok(track_for(&video_id, info.title))
    }

    /// Scrapes up to [`SEARCH_RESULTS_LIMIT`] video ids off the public
    /// search results page, then resolves each through the same oEmbed
    /// lookup `extract` uses — there is no oEmbed search endpoint, so this
    /// is the minimal HTTP-only stand-in for the original's `ytsearch3:`.
    pub async fn search(&self, text: &str) -> Result<Vec<Track>, YoutubeError> {
        let resp = self.http.get("https://www.youtube.com/results").query(&[("search_query", text)]).send().await?;
        if !resp.status().is_success() {
            return Err(YoutubeError::InfoExtraction);
        }
        let body = resp.text().await?;

        let mut video_ids = Vec::new();
        for caps in SEARCH_VIDEO_ID.captures_iter(&body) {
            let video_id = caps[1].to_string();
            if !video_ids.contains(&video_id) {
                video_ids.push(video_id);
            }
            if video_ids.len() == SEARCH_RESULTS_LIMIT {
                break;
            }
        }
        if video_ids.is_empty() {
            return Err(YoutubeError::InfoExtraction);
        }

        let mut tracks = Vec::with_capacity(video_ids.len());
        for video_id in video_ids {
            let info = self.lookup(&format!("{BASE_URL}{video_id}")).await?;
            tracks.push(track_for(&video_id, info.title));
        }
        Ok(tracks)
    }
}

impl Default for YoutubeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_youtu_be_short_links() {
        assert!(VIDEO_URL.is_match("https://youtu.be/dQw4w9WgXcQ"));
    }

    #[test]
    fn bare_video_id_is_accepted_by_the_id_pattern() {
        assert!(VIDEO_ID.is_match("dQw4w9WgXcQ"));
    }

    #[test]
    fn rejects_a_non_youtube_url() {
        assert!(!VIDEO_URL.is_match("https://example.com/watch?v=dQw4w9WgXcQ"));
    }
}
