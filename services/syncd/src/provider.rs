//! The capability contract both catalog providers implement.
//!
//! The engine never special-cases Spotify vs YouTube: it talks to this trait
//! and books quota through `quota_cost`, which is nonzero only for the
//! metered (YouTube Data API) operations.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Spotify,
    Youtube,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Spotify => "Spotify",
            ProviderKind::Youtube => "YouTube",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the ledger can be billed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOp {
    PlaylistLookup,
    PlaylistItemsPage,
    PlaylistCreate,
    PlaylistItemInsert,
    Search,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub track_count: i64,
}

#[derive(Debug, Clone)]
pub struct PlaylistItem {
    /// None for tombstoned (deleted/private) entries.
    pub source_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub unplayable: bool,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub target_id: String,
    pub matched_title: String,
    pub matched_artist: String,
    pub title_score: f64,
    pub artist_score: f64,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{kind} authentication required: {reason}")]
    Auth { kind: ProviderKind, reason: String },

    #[error("{kind} API error: HTTP {status}: {message}")]
    Api {
        kind: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("unexpected {kind} response: {message}")]
    Decode { kind: ProviderKind, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("token store error: {0}")]
    TokenStore(#[from] sqlx::Error),
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Advisory unit cost of one operation; callers bill the ledger.
    fn quota_cost(&self, op: ProviderOp) -> i64;

    async fn get_playlist_by_name(
        &self,
        name: &str,
    ) -> Result<Option<PlaylistInfo>, ProviderError>;

    /// All items of a playlist, pagination handled internally. Tombstoned
    /// entries come back with `unplayable = true` and no source id.
    async fn list_playlist_items(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<PlaylistItem>, ProviderError>;

    async fn create_playlist(&self, name: &str) -> Result<String, ProviderError>;

    /// Bulk add. Duplicate ids are accepted; the caller deduplicates where
    /// it matters.
    async fn add_to_playlist(
        &self,
        playlist_id: &str,
        target_ids: &[String],
    ) -> Result<(), ProviderError>;

    /// Search the catalog for the best acceptable match, or None.
    async fn search_auto(
        &self,
        track_name: &str,
        artist: &str,
    ) -> Result<Option<SearchHit>, ProviderError>;

    async fn get_playlist_track_count(&self, name: &str) -> Result<Option<i64>, ProviderError> {
        Ok(self
            .get_playlist_by_name(name)
            .await?
            .map(|info| info.track_count))
    }
}

/// Builds per-user provider clients. Token loading happens here so intake
/// can turn a missing token into a 401 before any job exists.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn provider(
        &self,
        kind: ProviderKind,
        user_id: &str,
    ) -> Result<Box<dyn Provider>, ProviderError>;
}

/// Factory producing the real REST clients.
pub struct HttpProviderFactory {
    http: reqwest::Client,
    tokens: crate::tokens::TokenStore,
    config: crate::config::AppConfig,
}

impl HttpProviderFactory {
    pub fn new(config: crate::config::AppConfig, tokens: crate::tokens::TokenStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            config,
        }
    }
}

#[async_trait]
impl ProviderFactory for HttpProviderFactory {
    async fn provider(
        &self,
        kind: ProviderKind,
        user_id: &str,
    ) -> Result<Box<dyn Provider>, ProviderError> {
        match kind {
            ProviderKind::Spotify => Ok(Box::new(
                crate::provider_spotify::SpotifyClient::connect(
                    self.http.clone(),
                    &self.tokens,
                    &self.config,
                    user_id,
                )
                .await?,
            )),
            ProviderKind::Youtube => Ok(Box::new(
                crate::provider_youtube::YoutubeClient::connect(
                    self.http.clone(),
                    &self.tokens,
                    &self.config,
                    user_id,
                )
                .await?,
            )),
        }
    }
}

/// Shared response handling: auth failures and non-2xx statuses become
/// typed errors instead of surprise JSON decode failures.
pub(crate) async fn read_json(
    resp: reqwest::Response,
    kind: ProviderKind,
) -> Result<serde_json::Value, ProviderError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::Auth {
            kind,
            reason: format!("provider rejected the token (HTTP {status})"),
        });
    }
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            kind,
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json().await?)
}

/// Query strategies tried against the target catalog, most specific first.
/// All candidates across queries compete in one pool.
pub(crate) fn search_queries(track_name: &str, artist: &str, artist_first: bool) -> Vec<String> {
    let normalized = trackmatch::normalize_title(track_name, &[artist]);
    let mut queries = vec![
        format!("{track_name} {artist}"),
        format!("{normalized} {artist}"),
        track_name.to_string(),
    ];
    if artist_first {
        queries.push(format!("{artist} {track_name}"));
    }
    queries.dedup();
    queries
}
