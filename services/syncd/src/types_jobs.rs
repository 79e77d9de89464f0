use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SyncSpToYt,
    SyncYtToSp,
    Merge,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::SyncSpToYt => "sync_sp_to_yt",
            JobType::SyncYtToSp => "sync_yt_to_sp",
            JobType::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync_sp_to_yt" => Some(JobType::SyncSpToYt),
            "sync_yt_to_sp" => Some(JobType::SyncYtToSp),
            "merge" => Some(JobType::Merge),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    ReadyToFinalize,
    Finalizing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::ReadyToFinalize => "ready_to_finalize",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "ready_to_finalize" => Some(JobStatus::ReadyToFinalize),
            "finalizing" => Some(JobStatus::Finalizing),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// The lifecycle DAG. Any non-terminal status may drop to `error`
    /// (runner failures and the reaper's timeout sweep).
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (from, to),
            (Pending, ReadyToFinalize)
                | (Pending, Error)
                | (ReadyToFinalize, Finalizing)
                | (ReadyToFinalize, Error)
                | (Finalizing, Completed)
                | (Finalizing, Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Found,
    NotFound,
}

/// One per-track verdict from the matching phase. Written once by the
/// pipeline, read by the finalizer, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDecision {
    pub name: String,
    pub artist: String,
    pub status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_artist: Option<String>,
    pub requires_manual_search: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TrackDecision {
    pub fn found(
        name: &str,
        artist: &str,
        target_id: String,
        target_title: String,
        target_artist: String,
    ) -> Self {
        Self {
            name: name.to_string(),
            artist: artist.to_string(),
            status: DecisionStatus::Found,
            target_id: Some(target_id),
            target_title: Some(target_title),
            target_artist: Some(target_artist),
            requires_manual_search: false,
            reason: None,
        }
    }

    pub fn not_found(name: &str, artist: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            artist: artist.to_string(),
            status: DecisionStatus::NotFound,
            target_id: None,
            target_title: None,
            target_artist: None,
            requires_manual_search: true,
            reason: Some(reason.to_string()),
        }
    }
}

/// Per-side counts for a merge job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub merged_playlist: String,
    pub sp_native: usize,
    pub sp_matched: usize,
    pub sp_unmatched: usize,
    pub yt_native: usize,
    pub yt_matched: usize,
    pub yt_unmatched: usize,
}

/// The `result` column, one variant per job family. Stored as JSONB and
/// re-validated whenever a worker reads it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Sync { songs: Vec<TrackDecision> },
    Merge { report: MergeReport },
}

impl JobOutcome {
    pub fn empty_sync() -> Self {
        JobOutcome::Sync { songs: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub user_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub playlist_name: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub job_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Parse the stored result back into its typed form.
    pub fn outcome(&self) -> Result<Option<JobOutcome>, serde_json::Error> {
        match &self.result {
            Some(value) => serde_json::from_value(value.clone()).map(Some),
            None => Ok(None),
        }
    }
}

/// Insert-time shape of a job. Intake creates `pending` rows, except the
/// empty-playlist shortcut which lands directly in `completed`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: Uuid,
    pub user_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub playlist_name: String,
    pub result: Option<JobOutcome>,
    pub job_notes: Option<String>,
}

/// Fields a transition may update alongside the status swap.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub result: Option<JobOutcome>,
    pub error: Option<String>,
    pub job_notes: Option<String>,
}

impl JobPatch {
    pub fn with_result(outcome: JobOutcome) -> Self {
        Self {
            result: Some(outcome),
            ..Default::default()
        }
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_dag_is_pinned() {
        use JobStatus::*;
        let valid = [
            (Pending, ReadyToFinalize),
            (Pending, Error),
            (ReadyToFinalize, Finalizing),
            (ReadyToFinalize, Error),
            (Finalizing, Completed),
            (Finalizing, Error),
        ];
        let all = [Pending, ReadyToFinalize, Finalizing, Completed, Error];
        for from in all {
            for to in all {
                let expected = valid.contains(&(from, to));
                assert_eq!(
                    JobStatus::can_transition(from, to),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        use JobStatus::*;
        for terminal in [Completed, Error] {
            for to in [Pending, ReadyToFinalize, Finalizing, Completed, Error] {
                assert!(!JobStatus::can_transition(terminal, to));
            }
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::ReadyToFinalize,
            JobStatus::Finalizing,
            JobStatus::Completed,
            JobStatus::Error,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn outcome_round_trips_through_json() {
        let outcome = JobOutcome::Sync {
            songs: vec![
                TrackDecision::found("A", "B", "id".into(), "A'".into(), "B'".into()),
                TrackDecision::not_found("C", "D", "No acceptable match found."),
            ],
        };
        let value = serde_json::to_value(&outcome).unwrap();
        let back: JobOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }
}
