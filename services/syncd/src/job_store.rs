//! Durable job records. The status column is the single source of truth for
//! the lifecycle; every mutation is a compare-and-swap on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::types_jobs::{JobPatch, JobRecord, JobStatus, JobType, NewJob};

pub const TIMED_OUT_MESSAGE: &str = "Job timed out.";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job row {job_id} has an unrecognized {field}: {value}")]
    Corrupt {
        job_id: Uuid,
        field: &'static str,
        value: String,
    },

    #[error("failed to encode job payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// Most recently created job for a user.
    async fn latest(&self, user_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Swap `from -> to`, applying the patch in the same statement. Returns
    /// false when the row's current status no longer matches `from`.
    async fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<bool, StoreError>;

    /// Error out pending/ready jobs not touched since the cutoff. Returns
    /// the ids that were swept.
    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    /// Delete completed/error jobs not touched since the cutoff.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    user_id: String,
    #[sqlx(rename = "type")]
    job_type: String,
    status: String,
    playlist_name: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    job_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord, StoreError> {
        let job_type = JobType::parse(&self.job_type).ok_or_else(|| StoreError::Corrupt {
            job_id: self.job_id,
            field: "type",
            value: self.job_type.clone(),
        })?;
        let status = JobStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt {
            job_id: self.job_id,
            field: "status",
            value: self.status.clone(),
        })?;
        Ok(JobRecord {
            job_id: self.job_id,
            user_id: self.user_id,
            job_type,
            status,
            playlist_name: self.playlist_name,
            result: self.result,
            error: self.error,
            job_notes: self.job_notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_JOB: &str = r#"
    SELECT job_id, user_id, type, status, playlist_name, result, error,
           job_notes, created_at, updated_at
    FROM jobs
"#;

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let result = job
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO jobs (job_id, user_id, type, status, playlist_name, result, job_notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING job_id, user_id, type, status, playlist_name, result, error,
                      job_notes, created_at, updated_at
            "#,
        )
        .bind(job.job_id)
        .bind(&job.user_id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.playlist_name)
        .bind(result)
        .bind(&job.job_notes)
        .fetch_one(&self.pool)
        .await?;

        row.into_record()
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!("{SELECT_JOB} WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_record).transpose()
    }

    async fn latest(&self, user_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "{SELECT_JOB} WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_record).transpose()
    }

    async fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<bool, StoreError> {
        if !JobStatus::can_transition(from, to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let result = patch
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        // A job in `error` carries an error and no result; anywhere else the
        // patch only adds to what is already there.
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3,
                result = CASE WHEN $3 = 'error' THEN NULL ELSE COALESCE($4, result) END,
                error = COALESCE($5, error),
                job_notes = COALESCE($6, job_notes),
                updated_at = NOW()
            WHERE job_id = $1
              AND status = $2
            "#,
        )
        .bind(job_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(result)
        .bind(&patch.error)
        .bind(&patch.job_notes)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let swept: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'error',
                error = $2,
                result = NULL,
                updated_at = NOW()
            WHERE status IN ('pending', 'ready_to_finalize')
              AND updated_at < $1
            RETURNING job_id
            "#,
        )
        .bind(cutoff)
        .bind(TIMED_OUT_MESSAGE)
        .fetch_all(&self.pool)
        .await?;

        Ok(swept.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'error')
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
