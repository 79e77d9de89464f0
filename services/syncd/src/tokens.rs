//! OAuth token persistence, keyed by user. The engine treats token JSON as
//! opaque; the provider clients parse what they need and write refreshed
//! tokens back.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::provider::ProviderKind;

#[derive(Clone)]
pub struct TokenStore {
    pool: PgPool,
}

impl TokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        kind: ProviderKind,
        user_id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let sql = match kind {
            ProviderKind::Spotify => "SELECT token_json FROM spotify_token WHERE user_id = $1",
            ProviderKind::Youtube => "SELECT token_json FROM youtube_token WHERE user_id = $1",
        };
        sqlx::query_scalar(sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn save(
        &self,
        kind: ProviderKind,
        user_id: &str,
        token_json: &str,
    ) -> Result<(), sqlx::Error> {
        let sql = match kind {
            ProviderKind::Spotify => {
                r#"
                INSERT INTO spotify_token (user_id, token_json)
                VALUES ($1, $2)
                ON CONFLICT (user_id) DO UPDATE
                  SET token_json = EXCLUDED.token_json, updated_at = NOW()
                "#
            }
            ProviderKind::Youtube => {
                r#"
                INSERT INTO youtube_token (user_id, token_json)
                VALUES ($1, $2)
                ON CONFLICT (user_id) DO UPDATE
                  SET token_json = EXCLUDED.token_json, updated_at = NOW()
                "#
            }
        };
        sqlx::query(sql)
            .bind(user_id)
            .bind(token_json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// True when an expiry stamp is absent or still comfortably in the future.
pub(crate) fn still_valid(expires_at: Option<DateTime<Utc>>) -> bool {
    match expires_at {
        Some(at) => at > Utc::now() + chrono::Duration::seconds(60),
        None => true,
    }
}
