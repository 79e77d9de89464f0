//! YouTube client. Playlist operations go through the metered Data API v3
//! and report real unit costs; search goes through the public web endpoint,
//! which the daily quota does not meter.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::AppConfig;
use crate::provider::{
    read_json, search_queries, PlaylistInfo, PlaylistItem, Provider, ProviderError, ProviderKind,
    ProviderOp, SearchHit,
};
use crate::tokens::{still_valid, TokenStore};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const WEB_SEARCH_URL: &str = "https://www.youtube.com/youtubei/v1/search";
const WEB_CLIENT_VERSION: &str = "2.20240101.00.00";
/// Filter param restricting web search results to plain videos.
const WEB_SEARCH_VIDEO_FILTER: &str = "EgIQAQ%3D%3D";
const SEARCH_CANDIDATES_PER_QUERY: usize = 10;

/// Google's credential dump: `token` is the access token, `expiry` an
/// RFC3339-ish stamp. Unknown fields are preserved round-trip.
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

fn parse_expiry(stamp: Option<&str>) -> Option<DateTime<Utc>> {
    let stamp = stamp?;
    if let Ok(at) = DateTime::parse_from_rfc3339(stamp) {
        return Some(at.with_timezone(&Utc));
    }
    // Credentials written without an offset are UTC.
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub struct YoutubeClient {
    http: reqwest::Client,
    access_token: String,
}

impl YoutubeClient {
    pub async fn connect(
        http: reqwest::Client,
        tokens: &TokenStore,
        config: &AppConfig,
        user_id: &str,
    ) -> Result<Self, ProviderError> {
        let raw = tokens
            .get(ProviderKind::Youtube, user_id)
            .await?
            .ok_or_else(|| auth("no YouTube token on file for this user"))?;

        let mut stored: StoredToken = serde_json::from_str(&raw)
            .map_err(|e| auth(&format!("stored YouTube token is unreadable: {e}")))?;

        if !still_valid(parse_expiry(stored.expiry.as_deref())) {
            stored = refresh_token(&http, config, stored).await?;
            let serialized = serde_json::to_string(&stored).map_err(|e| ProviderError::Decode {
                kind: ProviderKind::Youtube,
                message: e.to_string(),
            })?;
            tokens
                .save(ProviderKind::Youtube, user_id, &serialized)
                .await?;
        }

        Ok(Self {
            http,
            access_token: stored.token,
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;
        read_json(resp, ProviderKind::Youtube).await
    }

    async fn post_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .json(body)
            .send()
            .await?;
        read_json(resp, ProviderKind::Youtube).await
    }

    async fn web_search(&self, query: &str) -> Result<Vec<trackmatch::Candidate>, ProviderError> {
        let body = serde_json::json!({
            "context": {
                "client": {
                    "clientName": "WEB",
                    "clientVersion": WEB_CLIENT_VERSION,
                    "hl": "en",
                    "gl": "US",
                }
            },
            "query": query,
            "params": WEB_SEARCH_VIDEO_FILTER,
        });

        let resp = self
            .http
            .post(WEB_SEARCH_URL)
            .query(&[("prettyPrint", "false")])
            .json(&body)
            .send()
            .await?;
        let json = read_json(resp, ProviderKind::Youtube).await?;
        Ok(collect_video_results(&json))
    }
}

fn auth(reason: &str) -> ProviderError {
    ProviderError::Auth {
        kind: ProviderKind::Youtube,
        reason: reason.to_string(),
    }
}

async fn refresh_token(
    http: &reqwest::Client,
    config: &AppConfig,
    mut stored: StoredToken,
) -> Result<StoredToken, ProviderError> {
    let refresh = stored
        .refresh_token
        .clone()
        .ok_or_else(|| auth("token expired and no refresh token is stored"))?;
    let client_id = config
        .yt_client_id
        .as_deref()
        .ok_or_else(|| auth("YouTube client credentials are not configured"))?;
    let client_secret = config
        .yt_client_secret
        .as_deref()
        .ok_or_else(|| auth("YouTube client credentials are not configured"))?;

    let resp = http
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.as_str()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::BAD_REQUEST
        || resp.status() == reqwest::StatusCode::UNAUTHORIZED
    {
        return Err(auth("Google rejected the refresh token"));
    }
    let json = read_json(resp, ProviderKind::Youtube).await?;

    stored.token = json["access_token"]
        .as_str()
        .ok_or_else(|| auth("refresh response carried no access token"))?
        .to_string();
    let expires_in = json["expires_in"].as_i64().unwrap_or(3600);
    stored.expiry = Some((Utc::now() + Duration::seconds(expires_in)).to_rfc3339());
    Ok(stored)
}

/// Dig the video rows out of the web search response. The shape is deeply
/// nested and shifts over time, so everything is optional.
fn collect_video_results(json: &Value) -> Vec<trackmatch::Candidate> {
    let mut out = Vec::new();
    let sections = json["contents"]["twoColumnSearchResultsRenderer"]["primaryContents"]
        ["sectionListRenderer"]["contents"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    for section in &sections {
        let Some(rows) = section["itemSectionRenderer"]["contents"].as_array() else {
            continue;
        };
        for row in rows {
            let video = &row["videoRenderer"];
            let (Some(id), Some(title)) = (
                video["videoId"].as_str(),
                video["title"]["runs"][0]["text"].as_str(),
            ) else {
                continue;
            };
            let channel = video["ownerText"]["runs"][0]["text"]
                .as_str()
                .unwrap_or_default();
            out.push(trackmatch::Candidate {
                id: id.to_string(),
                title: title.to_string(),
                artist: channel.to_string(),
            });
            if out.len() >= SEARCH_CANDIDATES_PER_QUERY {
                return out;
            }
        }
    }
    out
}

#[async_trait::async_trait]
impl Provider for YoutubeClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Youtube
    }

    /// Data API unit costs; the web search path is unmetered.
    fn quota_cost(&self, op: ProviderOp) -> i64 {
        match op {
            ProviderOp::PlaylistLookup => 1,
            ProviderOp::PlaylistItemsPage => 1,
            ProviderOp::PlaylistCreate => 50,
            ProviderOp::PlaylistItemInsert => 50,
            ProviderOp::Search => 0,
        }
    }

    async fn get_playlist_by_name(
        &self,
        name: &str,
    ) -> Result<Option<PlaylistInfo>, ProviderError> {
        let mut page_token: Option<String> = None;
        loop {
            let page = {
                let mut query = vec![
                    ("part", "snippet,contentDetails"),
                    ("mine", "true"),
                    ("maxResults", "50"),
                ];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get_json(&format!("{API_BASE}/playlists"), &query).await?
            };

            if let Some(items) = page["items"].as_array() {
                for item in items {
                    let title = item["snippet"]["title"].as_str().unwrap_or_default();
                    if title.eq_ignore_ascii_case(name) {
                        return Ok(Some(PlaylistInfo {
                            id: item["id"].as_str().unwrap_or_default().to_string(),
                            title: title.to_string(),
                            track_count: item["contentDetails"]["itemCount"].as_i64().unwrap_or(0),
                        }));
                    }
                }
            }
            match page["nextPageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }

    async fn list_playlist_items(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<PlaylistItem>, ProviderError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = {
                let mut query = vec![
                    ("part", "snippet"),
                    ("playlistId", playlist_id),
                    ("maxResults", "50"),
                ];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get_json(&format!("{API_BASE}/playlistItems"), &query)
                    .await?
            };

            if let Some(rows) = page["items"].as_array() {
                for row in rows {
                    let snippet = &row["snippet"];
                    match snippet["resourceId"]["videoId"].as_str() {
                        Some(video_id) => items.push(PlaylistItem {
                            source_id: Some(video_id.to_string()),
                            title: snippet["title"].as_str().unwrap_or("Untitled").to_string(),
                            artist: snippet["videoOwnerChannelTitle"]
                                .as_str()
                                .unwrap_or("Unknown Artist")
                                .to_string(),
                            unplayable: false,
                        }),
                        // Deleted/private videos keep a row but lose the id.
                        None => items.push(PlaylistItem {
                            source_id: None,
                            title: snippet["title"]
                                .as_str()
                                .unwrap_or("Unavailable video")
                                .to_string(),
                            artist: String::new(),
                            unplayable: true,
                        }),
                    }
                }
            }
            match page["nextPageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(items)
    }

    async fn create_playlist(&self, name: &str) -> Result<String, ProviderError> {
        let created = self
            .post_json(
                &format!("{API_BASE}/playlists"),
                &[("part", "snippet,status")],
                &serde_json::json!({
                    "snippet": { "title": name, "description": "Synced playlist" },
                    "status": { "privacyStatus": "public" },
                }),
            )
            .await?;

        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Decode {
                kind: ProviderKind::Youtube,
                message: "create-playlist response carried no id".to_string(),
            })
    }

    async fn add_to_playlist(
        &self,
        playlist_id: &str,
        target_ids: &[String],
    ) -> Result<(), ProviderError> {
        // The Data API has no bulk insert; one call per video.
        for video_id in target_ids {
            self.post_json(
                &format!("{API_BASE}/playlistItems"),
                &[("part", "snippet")],
                &serde_json::json!({
                    "snippet": {
                        "playlistId": playlist_id,
                        "resourceId": { "kind": "youtube#video", "videoId": video_id },
                    }
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn search_auto(
        &self,
        track_name: &str,
        artist: &str,
    ) -> Result<Option<SearchHit>, ProviderError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<trackmatch::Candidate> = Vec::new();

        for query in search_queries(track_name, artist, true) {
            let results = match self.web_search(&query).await {
                Ok(results) => results,
                Err(err) => {
                    warn!(query = %query, "YouTube search query failed: {err}");
                    continue;
                }
            };
            for candidate in results {
                if seen.insert(candidate.id.clone()) {
                    candidates.push(candidate);
                }
            }
        }

        Ok(
            trackmatch::best_match(track_name, artist, &candidates).map(|m| SearchHit {
                target_id: m.id,
                matched_title: m.title,
                matched_artist: m.artist,
                title_score: m.title_score,
                artist_score: m.artist_score,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_parses_both_google_formats() {
        assert!(parse_expiry(Some("2026-01-01T00:00:00Z")).is_some());
        assert!(parse_expiry(Some("2026-01-01T00:00:00.123456")).is_some());
        assert!(parse_expiry(Some("not a date")).is_none());
        assert!(parse_expiry(None).is_none());
    }

    #[test]
    fn web_search_parser_walks_the_nesting() {
        let json = serde_json::json!({
            "contents": { "twoColumnSearchResultsRenderer": { "primaryContents": {
                "sectionListRenderer": { "contents": [
                    { "itemSectionRenderer": { "contents": [
                        { "videoRenderer": {
                            "videoId": "abc123",
                            "title": { "runs": [ { "text": "Hotline Bling" } ] },
                            "ownerText": { "runs": [ { "text": "Drake" } ] },
                        }},
                        { "shelfRenderer": {} },
                    ]}}
                ]}
            }}}
        });
        let results = collect_video_results(&json);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "abc123");
        assert_eq!(results[0].artist, "Drake");
    }
}
