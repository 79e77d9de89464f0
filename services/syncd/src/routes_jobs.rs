//! Job intake and status endpoints. Handlers stay thin: validation, quota,
//! and enqueueing live in `intake`; state transitions in the job store.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::intake;
use crate::queue::Task;
use crate::state::SharedState;
use crate::types_jobs::{JobPatch, JobRecord, JobStatus, JobType};

#[derive(Deserialize)]
pub struct SyncRequest {
    pub playlist_name: String,
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct MergeRequest {
    pub yt_playlist: String,
    pub sp_playlist: String,
    pub new_playlist_name: String,
    pub user_id: String,
}

#[derive(Serialize)]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub async fn start_sync_sp_to_yt(
    State(state): State<SharedState>,
    Json(req): Json<SyncRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    start_sync(state, JobType::SyncSpToYt, req).await
}

pub async fn start_sync_yt_to_sp(
    State(state): State<SharedState>,
    Json(req): Json<SyncRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    start_sync(state, JobType::SyncYtToSp, req).await
}

async fn start_sync(
    state: SharedState,
    job_type: JobType,
    req: SyncRequest,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    let admission = intake::admit_sync(&state, job_type, &req.playlist_name, &req.user_id)
        .await
        .map_err(|e| (e.status(), e.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id: admission.job_id,
        }),
    ))
}

pub async fn start_merge_playlists(
    State(state): State<SharedState>,
    Json(req): Json<MergeRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    let admission = intake::admit_merge(
        &state,
        &req.yt_playlist,
        &req.sp_playlist,
        &req.new_playlist_name,
        &req.user_id,
    )
    .await
    .map_err(|e| (e.status(), e.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id: admission.job_id,
        }),
    ))
}

fn job_json(job: &JobRecord) -> serde_json::Value {
    serde_json::json!({
        "job_id": job.job_id,
        "status": job.status,
        "result": job.result,
        "error": job.error,
        "type": job.job_type,
        "playlist_name": job.playlist_name,
        "job_notes": job.job_notes,
        "updated_at": job.updated_at,
    })
}

pub async fn get_job(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .store
        .get(job_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Job not found".to_string()))?;
    Ok(Json(job_json(&job)))
}

pub async fn get_latest_job(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .store
        .latest(&user_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "No jobs found for user".to_string()))?;
    Ok(Json(job_json(&job)))
}

/// The user saw the match results and wants the target playlist written.
pub async fn finalize_job(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .store
        .get(job_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Job not found".to_string()))?;

    let moved = state
        .store
        .transition(
            job_id,
            JobStatus::ReadyToFinalize,
            JobStatus::Finalizing,
            JobPatch::default(),
        )
        .await
        .map_err(internal)?;
    if !moved {
        // Report whatever the job actually is right now.
        let current = state
            .store
            .get(job_id)
            .await
            .map_err(internal)?
            .map(|j| j.status)
            .unwrap_or(job.status);
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Job is not ready to finalize, current status is {current}"),
        ));
    }

    state
        .queue
        .enqueue(&Task::RunFinalizeJob { job_id })
        .await
        .map_err(internal)?;
    info!(%job_id, "finalize: queued");

    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "status": "finalizing",
    })))
}
