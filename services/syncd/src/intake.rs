//! Admission control: validate the request, reserve quota, create the job
//! row, enqueue the task. Everything that can be rejected is rejected here,
//! before any worker touches the job.

use axum::http::StatusCode;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::job_store::StoreError;
use crate::provider::{ProviderError, ProviderKind, ProviderOp};
use crate::quota::bill;
use crate::queue::Task;
use crate::state::AppState;
use crate::types_jobs::{JobOutcome, JobStatus, JobType, NewJob};

/// 1 unit to list plus 50 per insert on the video side.
pub const COST_PER_SONG_SP_TO_YT: i64 = 51;
pub const COST_PER_SONG_YT_TO_SP: i64 = 1;

pub const NO_SONGS_NOTE: &str = "No songs to sync";

static INVALID_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/\[\]+?#&%*|<>"']"#).expect("name regex"));

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Playlist name '{0}' contains invalid characters. Please rename the playlist and try again.")]
    InvalidName(String),

    #[error("{0} authentication required.")]
    AuthRequired(ProviderKind),

    #[error("{kind} playlist '{name}' not found.")]
    PlaylistNotFound { kind: ProviderKind, name: String },

    #[error("Insufficient YouTube API quota to sync any songs. Please try again after the quota resets.")]
    QuotaExhausted,

    #[error("provider request failed: {0}")]
    Provider(ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::InvalidName(_) => StatusCode::BAD_REQUEST,
            AdmissionError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            AdmissionError::PlaylistNotFound { .. } => StatusCode::NOT_FOUND,
            AdmissionError::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::Provider(_) | AdmissionError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ProviderError> for AdmissionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Auth { kind, .. } => AdmissionError::AuthRequired(kind),
            other => AdmissionError::Provider(other),
        }
    }
}

pub fn validate_playlist_name(name: &str) -> Result<(), AdmissionError> {
    if name.is_empty() || INVALID_NAME_CHARS.is_match(name) {
        return Err(AdmissionError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// What the quota ledger granted for this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Full,
    Limited { song_limit: i64, note: String },
}

impl Reservation {
    pub fn song_limit(&self) -> Option<i64> {
        match self {
            Reservation::Full => None,
            Reservation::Limited { song_limit, .. } => Some(*song_limit),
        }
    }

    pub fn note(&self) -> Option<String> {
        match self {
            Reservation::Full => None,
            Reservation::Limited { note, .. } => Some(note.clone()),
        }
    }
}

/// Reserve quota for `track_count` songs, falling back to a partial
/// reservation when the full amount does not fit under the ceiling.
pub async fn reserve_for_sync(
    ledger: &dyn crate::quota::QuotaLedger,
    ceiling: i64,
    track_count: i64,
    cost_per_song: i64,
) -> Result<Reservation, AdmissionError> {
    let estimated_cost = track_count * cost_per_song;
    if ledger.reserve(estimated_cost, ceiling).await? {
        return Ok(Reservation::Full);
    }

    let available = ceiling - ledger.used().await?;
    let songs_to_sync = if available > 0 {
        available / cost_per_song
    } else {
        0
    };
    if songs_to_sync < 1 {
        return Err(AdmissionError::QuotaExhausted);
    }
    if !ledger.reserve(songs_to_sync * cost_per_song, ceiling).await? {
        // Another request slipped in between Used() and Reserve().
        return Err(AdmissionError::QuotaExhausted);
    }

    Ok(Reservation::Limited {
        song_limit: songs_to_sync,
        note: format!(
            "Sync limited to {songs_to_sync} of {track_count} songs due to API quota."
        ),
    })
}

#[derive(Debug)]
pub struct Admission {
    pub job_id: Uuid,
}

pub async fn admit_sync(
    state: &AppState,
    job_type: JobType,
    playlist_name: &str,
    user_id: &str,
) -> Result<Admission, AdmissionError> {
    validate_playlist_name(playlist_name)?;

    let (source_kind, cost_per_song) = match job_type {
        JobType::SyncSpToYt => (ProviderKind::Spotify, COST_PER_SONG_SP_TO_YT),
        JobType::SyncYtToSp => (ProviderKind::Youtube, COST_PER_SONG_YT_TO_SP),
        JobType::Merge => unreachable!("merge admission has its own entry point"),
    };

    let source = state.providers.provider(source_kind, user_id).await?;
    let track_count = source
        .get_playlist_track_count(playlist_name)
        .await?
        .ok_or_else(|| AdmissionError::PlaylistNotFound {
            kind: source_kind,
            name: playlist_name.to_string(),
        })?;
    bill(state.ledger.as_ref(), source.as_ref(), ProviderOp::PlaylistLookup).await?;

    let job_id = Uuid::new_v4();

    if track_count == 0 {
        // Nothing to do; the job is born terminal and no task is enqueued.
        info!(%job_id, playlist = playlist_name, "intake: empty playlist, creating completed job");
        state
            .store
            .create(NewJob {
                job_id,
                user_id: user_id.to_string(),
                job_type,
                status: JobStatus::Completed,
                playlist_name: playlist_name.to_string(),
                result: Some(JobOutcome::empty_sync()),
                job_notes: Some(NO_SONGS_NOTE.to_string()),
            })
            .await?;
        return Ok(Admission { job_id });
    }

    let ceiling = state.config.quota_limit - state.config.quota_buffer;
    let reservation =
        reserve_for_sync(state.ledger.as_ref(), ceiling, track_count, cost_per_song).await?;
    if let Reservation::Limited { song_limit, .. } = &reservation {
        info!(%job_id, song_limit, track_count, "intake: partial reservation");
    }

    state
        .store
        .create(NewJob {
            job_id,
            user_id: user_id.to_string(),
            job_type,
            status: JobStatus::Pending,
            playlist_name: playlist_name.to_string(),
            result: None,
            job_notes: reservation.note(),
        })
        .await?;

    let task = match job_type {
        JobType::SyncSpToYt => Task::RunSyncSpToYtJob {
            job_id,
            playlist_name: playlist_name.to_string(),
            user_id: user_id.to_string(),
            song_limit: reservation.song_limit(),
        },
        JobType::SyncYtToSp => Task::RunSyncYtToSpJob {
            job_id,
            playlist_name: playlist_name.to_string(),
            user_id: user_id.to_string(),
            song_limit: reservation.song_limit(),
        },
        JobType::Merge => unreachable!(),
    };
    state.queue.enqueue(&task).await?;
    info!(%job_id, task = task.name(), "intake: job admitted");

    Ok(Admission { job_id })
}

/// Merge admission: validate all three names and enqueue. Merges are rare
/// and bounded by the two source playlists, so no quota is pre-reserved;
/// actual usage is still billed by the runner.
pub async fn admit_merge(
    state: &AppState,
    yt_playlist: &str,
    sp_playlist: &str,
    new_playlist_name: &str,
    user_id: &str,
) -> Result<Admission, AdmissionError> {
    validate_playlist_name(new_playlist_name)?;
    validate_playlist_name(yt_playlist)?;
    validate_playlist_name(sp_playlist)?;

    let job_id = Uuid::new_v4();
    state
        .store
        .create(NewJob {
            job_id,
            user_id: user_id.to_string(),
            job_type: JobType::Merge,
            status: JobStatus::Pending,
            playlist_name: new_playlist_name.to_string(),
            result: None,
            job_notes: None,
        })
        .await?;

    state
        .queue
        .enqueue(&Task::RunMergePlaylistsJob {
            job_id,
            yt_playlist: yt_playlist.to_string(),
            sp_playlist: sp_playlist.to_string(),
            new_playlist_name: new_playlist_name.to_string(),
            user_id: user_id.to_string(),
        })
        .await?;
    info!(%job_id, "intake: merge job admitted");

    Ok(Admission { job_id })
}
