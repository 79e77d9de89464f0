//! Postgres-backed task queue with named queues and at-least-once delivery.
//!
//! Messages survive restarts; a crashed worker's lease expires and the task
//! is claimed again. Handlers own idempotency (job-status CAS), so
//! redelivery is safe. Routing task name -> queue name is static.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::job_store::StoreError;

pub const QUEUE_JOBS: &str = "jobs";
pub const QUEUE_CLEANUP: &str = "cleanup";

const LEASE_SECS: i64 = 30;
const MAX_ATTEMPTS: i32 = 5;

/// Wire form of every task the engine runs. The serde tag doubles as the
/// broker-visible task name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    RunSyncSpToYtJob {
        job_id: Uuid,
        playlist_name: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_limit: Option<i64>,
    },
    RunSyncYtToSpJob {
        job_id: Uuid,
        playlist_name: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song_limit: Option<i64>,
    },
    RunMergePlaylistsJob {
        job_id: Uuid,
        yt_playlist: String,
        sp_playlist: String,
        new_playlist_name: String,
        user_id: String,
    },
    RunFinalizeJob {
        job_id: Uuid,
    },
    CleanupJobs,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::RunSyncSpToYtJob { .. } => "run_sync_sp_to_yt_job",
            Task::RunSyncYtToSpJob { .. } => "run_sync_yt_to_sp_job",
            Task::RunMergePlaylistsJob { .. } => "run_merge_playlists_job",
            Task::RunFinalizeJob { .. } => "run_finalize_job",
            Task::CleanupJobs => "cleanup_jobs",
        }
    }

    /// Static routing. Cleanup rides its own queue so long sync tasks can
    /// never starve the reaper.
    pub fn queue(&self) -> &'static str {
        match self {
            Task::CleanupJobs => QUEUE_CLEANUP,
            _ => QUEUE_JOBS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub task: Task,
    pub attempts: i32,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &Task) -> Result<Uuid, StoreError>;

    /// Claim the oldest deliverable task on a queue: `queued`, or `running`
    /// with an expired lease (crash redelivery). None when the queue is
    /// drained.
    async fn claim(&self, queue: &str, worker_id: &str) -> Result<Option<ClaimedTask>, StoreError>;

    /// Extend the lease while a handler is still working.
    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> Result<(), StoreError>;

    /// Acknowledge successful handling; the message is not redelivered.
    async fn ack(&self, task_id: Uuid) -> Result<(), StoreError>;

    /// Hand the message back for another delivery attempt.
    async fn retry(&self, task_id: Uuid, error: &str) -> Result<(), StoreError>;
}

pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park messages that have exhausted their delivery attempts.
    async fn fail_exhausted(&self, queue: &str) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed',
                error = 'Max delivery attempts reached',
                lease_owner = NULL,
                lease_until = NULL,
                updated_at = NOW()
            WHERE queue = $1
              AND attempts >= $2
              AND (status = 'queued'
                   OR (status = 'running' AND lease_until < NOW()))
            "#,
        )
        .bind(queue)
        .bind(MAX_ATTEMPTS)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, task: &Task) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO tasks (id, name, queue, args, status)
            VALUES ($1, $2, $3, $4, 'queued')
            "#,
        )
        .bind(id)
        .bind(task.name())
        .bind(task.queue())
        .bind(serde_json::to_value(task)?)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn claim(&self, queue: &str, worker_id: &str) -> Result<Option<ClaimedTask>, StoreError> {
        if let Ok(n) = self.fail_exhausted(queue).await {
            if n > 0 {
                warn!(queue, failed = n, "queue: parked tasks over the attempt cap");
            }
        }

        let row: Option<(Uuid, serde_json::Value, i32)> = sqlx::query_as(
            r#"
            UPDATE tasks
            SET status = 'running',
                lease_owner = $2,
                lease_until = NOW() + ($3 * INTERVAL '1 second'),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM tasks
                WHERE queue = $1
                  AND attempts < $4
                  AND (status = 'queued'
                       OR (status = 'running' AND lease_until < NOW()))
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, args, attempts
            "#,
        )
        .bind(queue)
        .bind(worker_id)
        .bind(LEASE_SECS)
        .bind(MAX_ATTEMPTS)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, args, attempts)) = row else {
            return Ok(None);
        };

        match serde_json::from_value::<Task>(args) {
            Ok(task) => Ok(Some(ClaimedTask { id, task, attempts })),
            Err(e) => {
                // Unparseable payloads can never succeed; park them.
                warn!(task_id = %id, "queue: unrecognized task payload: {e}");
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = 'failed', error = $2, lease_owner = NULL,
                        lease_until = NULL, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(format!("unrecognized task payload: {e}"))
                .execute(&self.pool)
                .await?;
                Ok(None)
            }
        }
    }

    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET lease_until = NOW() + ($3 * INTERVAL '1 second'),
                updated_at = NOW()
            WHERE id = $1
              AND status = 'running'
              AND lease_owner = $2
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(LEASE_SECS)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ack(&self, task_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'done',
                lease_owner = NULL,
                lease_until = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry(&self, task_id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'queued',
                error = $2,
                lease_owner = NULL,
                lease_until = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_match_wire_contract() {
        let job_id = Uuid::nil();
        let cases: Vec<(Task, &str, &str)> = vec![
            (
                Task::RunSyncSpToYtJob {
                    job_id,
                    playlist_name: "p".into(),
                    user_id: "u".into(),
                    song_limit: None,
                },
                "run_sync_sp_to_yt_job",
                QUEUE_JOBS,
            ),
            (
                Task::RunSyncYtToSpJob {
                    job_id,
                    playlist_name: "p".into(),
                    user_id: "u".into(),
                    song_limit: Some(9),
                },
                "run_sync_yt_to_sp_job",
                QUEUE_JOBS,
            ),
            (
                Task::RunMergePlaylistsJob {
                    job_id,
                    yt_playlist: "a".into(),
                    sp_playlist: "b".into(),
                    new_playlist_name: "c".into(),
                    user_id: "u".into(),
                },
                "run_merge_playlists_job",
                QUEUE_JOBS,
            ),
            (Task::RunFinalizeJob { job_id }, "run_finalize_job", QUEUE_JOBS),
            (Task::CleanupJobs, "cleanup_jobs", QUEUE_CLEANUP),
        ];

        for (task, name, queue) in cases {
            assert_eq!(task.name(), name);
            assert_eq!(task.queue(), queue);
            // The serde tag must agree with the broker-visible name.
            let value = serde_json::to_value(&task).unwrap();
            assert_eq!(value["task"], name);
            let back: Task = serde_json::from_value(value).unwrap();
            assert_eq!(back, task);
        }
    }
}
