//! Quota inspection and the administrative override.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::state::SharedState;

pub async fn youtube_quota_usage(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let total = state
        .ledger
        .used()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({
        "total": total,
        "limit": state.config.quota_limit,
    })))
}

#[derive(Deserialize)]
pub struct SetQuotaRequest {
    pub quota_value: i64,
}

/// Manual resync of the counter, e.g. after moving between environments
/// that share one provider project.
pub async fn set_youtube_quota(
    State(state): State<SharedState>,
    Json(req): Json<SetQuotaRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state
        .ledger
        .set(req.quota_value)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    info!(value = req.quota_value, "quota: total overridden");
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!("YouTube API quota set to {}", req.quota_value),
    })))
}
