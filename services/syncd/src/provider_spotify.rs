//! Spotify Web API client. None of its operations count against the shared
//! daily quota, so every `quota_cost` is zero.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::AppConfig;
use crate::provider::{
    read_json, search_queries, PlaylistInfo, PlaylistItem, Provider, ProviderError, ProviderKind,
    ProviderOp, SearchHit,
};
use crate::tokens::{still_valid, TokenStore};

const API_BASE: &str = "https://api.spotify.com/v1";
const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    access_token: String,
}

impl SpotifyClient {
    pub async fn connect(
        http: reqwest::Client,
        tokens: &TokenStore,
        config: &AppConfig,
        user_id: &str,
    ) -> Result<Self, ProviderError> {
        let raw = tokens
            .get(ProviderKind::Spotify, user_id)
            .await?
            .ok_or_else(|| auth("no Spotify token on file for this user"))?;

        let mut stored: StoredToken = serde_json::from_str(&raw)
            .map_err(|e| auth(&format!("stored Spotify token is unreadable: {e}")))?;

        if !still_valid(stored.expires_at) {
            stored = refresh_token(&http, config, stored).await?;
            let serialized = serde_json::to_string(&stored).map_err(|e| ProviderError::Decode {
                kind: ProviderKind::Spotify,
                message: e.to_string(),
            })?;
            tokens
                .save(ProviderKind::Spotify, user_id, &serialized)
                .await?;
        }

        Ok(Self {
            http,
            access_token: stored.access_token,
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
        read_json(resp, ProviderKind::Spotify).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        read_json(resp, ProviderKind::Spotify).await
    }
}

fn auth(reason: &str) -> ProviderError {
    ProviderError::Auth {
        kind: ProviderKind::Spotify,
        reason: reason.to_string(),
    }
}

async fn refresh_token(
    http: &reqwest::Client,
    config: &AppConfig,
    stored: StoredToken,
) -> Result<StoredToken, ProviderError> {
    let refresh = stored
        .refresh_token
        .clone()
        .ok_or_else(|| auth("token expired and no refresh token is stored"))?;
    let client_id = config
        .spotify_client_id
        .as_deref()
        .ok_or_else(|| auth("Spotify client credentials are not configured"))?;
    let client_secret = config
        .spotify_client_secret
        .as_deref()
        .ok_or_else(|| auth("Spotify client credentials are not configured"))?;

    let resp = http
        .post(ACCOUNTS_TOKEN_URL)
        .basic_auth(client_id, Some(client_secret))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.as_str()),
        ])
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::BAD_REQUEST
        || resp.status() == reqwest::StatusCode::UNAUTHORIZED
    {
        return Err(auth("Spotify rejected the refresh token"));
    }
    let json = read_json(resp, ProviderKind::Spotify).await?;

    let access_token = json["access_token"]
        .as_str()
        .ok_or_else(|| auth("refresh response carried no access token"))?
        .to_string();
    let expires_in = json["expires_in"].as_i64().unwrap_or(3600);

    Ok(StoredToken {
        access_token,
        // Spotify only rotates the refresh token occasionally.
        refresh_token: json["refresh_token"]
            .as_str()
            .map(str::to_string)
            .or(stored.refresh_token),
        expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
    })
}

fn artists_of(track: &Value) -> String {
    track["artists"]
        .as_array()
        .map(|artists| {
            artists
                .iter()
                .filter_map(|a| a["name"].as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Provider for SpotifyClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Spotify
    }

    fn quota_cost(&self, _op: ProviderOp) -> i64 {
        0
    }

    async fn get_playlist_by_name(
        &self,
        name: &str,
    ) -> Result<Option<PlaylistInfo>, ProviderError> {
        let mut url = format!("{API_BASE}/me/playlists?limit=50");
        loop {
            let page = self.get_json(&url, &[]).await?;
            if let Some(items) = page["items"].as_array() {
                for item in items {
                    let title = item["name"].as_str().unwrap_or_default();
                    if title.eq_ignore_ascii_case(name) {
                        return Ok(Some(PlaylistInfo {
                            id: item["id"].as_str().unwrap_or_default().to_string(),
                            title: title.to_string(),
                            track_count: item["tracks"]["total"].as_i64().unwrap_or(0),
                        }));
                    }
                }
            }
            match page["next"].as_str() {
                Some(next) => url = next.to_string(),
                None => return Ok(None),
            }
        }
    }

    async fn list_playlist_items(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<PlaylistItem>, ProviderError> {
        let mut items = Vec::new();
        let mut url = format!("{API_BASE}/playlists/{playlist_id}/tracks?limit=100");
        loop {
            let page = self.get_json(&url, &[]).await?;
            if let Some(rows) = page["items"].as_array() {
                for row in rows {
                    let track = &row["track"];
                    if track.is_null() {
                        // Removed from the catalog after being added.
                        items.push(PlaylistItem {
                            source_id: None,
                            title: "Unavailable track".to_string(),
                            artist: String::new(),
                            unplayable: true,
                        });
                        continue;
                    }
                    items.push(PlaylistItem {
                        source_id: track["uri"].as_str().map(str::to_string),
                        title: track["name"].as_str().unwrap_or("Untitled").to_string(),
                        artist: artists_of(track),
                        unplayable: false,
                    });
                }
            }
            match page["next"].as_str() {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }
        Ok(items)
    }

    async fn create_playlist(&self, name: &str) -> Result<String, ProviderError> {
        let me = self.get_json(&format!("{API_BASE}/me"), &[]).await?;
        let spotify_user = me["id"].as_str().ok_or_else(|| ProviderError::Decode {
            kind: ProviderKind::Spotify,
            message: "profile response carried no user id".to_string(),
        })?;

        let created = self
            .post_json(
                &format!("{API_BASE}/users/{spotify_user}/playlists"),
                &serde_json::json!({
                    "name": name,
                    "public": true,
                    "description": "Synced playlist",
                }),
            )
            .await?;

        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Decode {
                kind: ProviderKind::Spotify,
                message: "create-playlist response carried no id".to_string(),
            })
    }

    async fn add_to_playlist(
        &self,
        playlist_id: &str,
        target_ids: &[String],
    ) -> Result<(), ProviderError> {
        for chunk in target_ids.chunks(100) {
            self.post_json(
                &format!("{API_BASE}/playlists/{playlist_id}/tracks"),
                &serde_json::json!({ "uris": chunk }),
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

        for query in search_queries(track_name, artist, false) {
            let page = match self
                .get_json(
                    &format!("{API_BASE}/search"),
                    &[("q", query.as_str()), ("type", "track"), ("limit", "10")],
                )
                .await
            {
                Ok(page) => page,
                Err(err @ ProviderError::Auth { .. }) => return Err(err),
                Err(err) => {
                    warn!(query = %query, "Spotify search query failed: {err}");
                    continue;
                }
            };

            let Some(tracks) = page["tracks"]["items"].as_array() else {
                continue;
            };
            for track in tracks {
                let Some(uri) = track["uri"].as_str() else {
                    continue;
                };
                let Some(title) = track["name"].as_str() else {
                    continue;
                };
                if !seen.insert(uri.to_string()) {
                    continue;
                }
                candidates.push(trackmatch::Candidate {
                    id: uri.to_string(),
                    title: title.to_string(),
                    artist: artists_of(track),
                });
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
