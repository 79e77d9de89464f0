//! Task handlers. One per wire task, all sharing the same skeleton: load
//! the job, bail quietly when the status says another delivery got here
//! first, do the work, record the outcome with a compare-and-swap.
//!
//! Handlers never bubble job-level failures to the broker; a failed sync is
//! a successful task that moved the job to `error`.

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::{self, PipelineError};
use crate::provider::{Provider, ProviderKind, ProviderOp};
use crate::quota::{bill, bill_many};
use crate::queue::Task;
use crate::state::AppState;
use crate::types_jobs::{
    DecisionStatus, JobOutcome, JobPatch, JobStatus, JobType, MergeReport,
};

/// Dispatch one delivered task. An `Err` here means infrastructure trouble
/// (the job row could not even be loaded) and asks the broker to redeliver.
pub async fn handle(state: &AppState, task: &Task) -> Result<()> {
    match task {
        Task::RunSyncSpToYtJob {
            job_id,
            playlist_name,
            user_id,
            song_limit,
        } => {
            run_sync(
                state,
                *job_id,
                JobType::SyncSpToYt,
                playlist_name,
                user_id,
                *song_limit,
            )
            .await
        }
        Task::RunSyncYtToSpJob {
            job_id,
            playlist_name,
            user_id,
            song_limit,
        } => {
            run_sync(
                state,
                *job_id,
                JobType::SyncYtToSp,
                playlist_name,
                user_id,
                *song_limit,
            )
            .await
        }
        Task::RunMergePlaylistsJob {
            job_id,
            yt_playlist,
            sp_playlist,
            new_playlist_name,
            user_id,
        } => {
            run_merge(
                state,
                *job_id,
                yt_playlist,
                sp_playlist,
                new_playlist_name,
                user_id,
            )
            .await
        }
        Task::RunFinalizeJob { job_id } => run_finalize(state, *job_id).await,
        Task::CleanupJobs => run_cleanup(state).await,
    }
}

/// Record a job transition without letting its failure escape the handler.
/// A lost CAS means a redelivered task raced us; the job is already where
/// it should be.
async fn settle(state: &AppState, job_id: Uuid, from: JobStatus, to: JobStatus, patch: JobPatch) {
    match state.store.transition(job_id, from, to, patch).await {
        Ok(true) => info!(%job_id, %from, %to, "runner: job transitioned"),
        Ok(false) => warn!(%job_id, %from, %to, "runner: transition lost the CAS, leaving job as-is"),
        Err(e) => error!(%job_id, %from, %to, "runner: failed to record transition: {e:?}"),
    }
}

async fn run_sync(
    state: &AppState,
    job_id: Uuid,
    job_type: JobType,
    playlist_name: &str,
    user_id: &str,
    song_limit: Option<i64>,
) -> Result<()> {
    let Some(job) = state.store.get(job_id).await? else {
        error!(%job_id, "runner: job not found");
        return Ok(());
    };
    if job.status != JobStatus::Pending {
        info!(%job_id, status = %job.status, "runner: job is not pending, skipping redelivery");
        return Ok(());
    }

    info!(%job_id, job_type = %job_type, playlist = playlist_name, "runner: sync started");

    let (source_kind, target_kind) = match job_type {
        JobType::SyncSpToYt => (ProviderKind::Spotify, ProviderKind::Youtube),
        JobType::SyncYtToSp => (ProviderKind::Youtube, ProviderKind::Spotify),
        JobType::Merge => unreachable!("merge runs through run_merge"),
    };

    let outcome = async {
        let source = state.providers.provider(source_kind, user_id).await?;
        let target = state.providers.provider(target_kind, user_id).await?;
        pipeline::sync_playlist(
            source.as_ref(),
            target.as_ref(),
            state.ledger.as_ref(),
            playlist_name,
            song_limit,
        )
        .await
    }
    .await;

    match outcome {
        Ok(songs) => {
            info!(%job_id, songs = songs.len(), "runner: sync finished");
            settle(
                state,
                job_id,
                JobStatus::Pending,
                JobStatus::ReadyToFinalize,
                JobPatch::with_result(JobOutcome::Sync { songs }),
            )
            .await;
        }
        Err(e) => {
            error!(%job_id, "runner: sync failed: {e}");
            settle(
                state,
                job_id,
                JobStatus::Pending,
                JobStatus::Error,
                JobPatch::with_error(e.to_string()),
            )
            .await;
        }
    }
    Ok(())
}

async fn run_merge(
    state: &AppState,
    job_id: Uuid,
    yt_playlist: &str,
    sp_playlist: &str,
    new_playlist_name: &str,
    user_id: &str,
) -> Result<()> {
    let Some(job) = state.store.get(job_id).await? else {
        error!(%job_id, "runner: job not found");
        return Ok(());
    };
    if job.status != JobStatus::Pending {
        info!(%job_id, status = %job.status, "runner: job is not pending, skipping redelivery");
        return Ok(());
    }

    info!(%job_id, merged = new_playlist_name, "runner: merge started");

    match merge_playlists(state, yt_playlist, sp_playlist, new_playlist_name, user_id).await {
        Ok(report) => {
            settle(
                state,
                job_id,
                JobStatus::Pending,
                JobStatus::ReadyToFinalize,
                JobPatch::with_result(JobOutcome::Merge { report }),
            )
            .await;
        }
        Err(e) => {
            error!(%job_id, "runner: merge failed: {e}");
            settle(
                state,
                job_id,
                JobStatus::Pending,
                JobStatus::Error,
                JobPatch::with_error(e.to_string()),
            )
            .await;
        }
    }
    Ok(())
}

/// Build the merged playlist on both providers: native items are copied by
/// id, the opposite side's items go through matching. Misses are counted,
/// never fatal.
async fn merge_playlists(
    state: &AppState,
    yt_playlist: &str,
    sp_playlist: &str,
    new_playlist_name: &str,
    user_id: &str,
) -> Result<MergeReport, PipelineError> {
    let yt = state
        .providers
        .provider(ProviderKind::Youtube, user_id)
        .await?;
    let sp = state
        .providers
        .provider(ProviderKind::Spotify, user_id)
        .await?;
    let ledger = state.ledger.as_ref();

    bill(ledger, yt.as_ref(), ProviderOp::PlaylistLookup).await?;
    let yt_info = yt
        .get_playlist_by_name(yt_playlist)
        .await?
        .ok_or_else(|| PipelineError::SourceNotFound(yt_playlist.to_string()))?;
    bill(ledger, sp.as_ref(), ProviderOp::PlaylistLookup).await?;
    let sp_info = sp
        .get_playlist_by_name(sp_playlist)
        .await?
        .ok_or_else(|| PipelineError::SourceNotFound(sp_playlist.to_string()))?;

    bill(ledger, yt.as_ref(), ProviderOp::PlaylistItemsPage).await?;
    let yt_items = yt.list_playlist_items(&yt_info.id).await?;
    bill(ledger, sp.as_ref(), ProviderOp::PlaylistItemsPage).await?;
    let sp_items = sp.list_playlist_items(&sp_info.id).await?;

    let (sp_native, sp_matched, sp_unmatched) =
        merge_into(sp.as_ref(), ledger, new_playlist_name, &sp_items, &yt_items).await?;
    let (yt_native, yt_matched, yt_unmatched) =
        merge_into(yt.as_ref(), ledger, new_playlist_name, &yt_items, &sp_items).await?;

    Ok(MergeReport {
        merged_playlist: new_playlist_name.to_string(),
        sp_native,
        sp_matched,
        sp_unmatched,
        yt_native,
        yt_matched,
        yt_unmatched,
    })
}

/// Build one side of the merged playlist: copy this catalog's own items by
/// id, then match and add the opposite catalog's items. Returns
/// (native, matched, unmatched) counts.
async fn merge_into(
    native: &dyn Provider,
    ledger: &dyn crate::quota::QuotaLedger,
    new_playlist_name: &str,
    own_items: &[crate::provider::PlaylistItem],
    opposite_items: &[crate::provider::PlaylistItem],
) -> Result<(usize, usize, usize), PipelineError> {
    let merged = pipeline::resolve_or_create_target(native, ledger, new_playlist_name).await?;

    let own_ids: Vec<String> = own_items
        .iter()
        .filter_map(|item| item.source_id.clone())
        .collect();
    if !own_ids.is_empty() {
        native.add_to_playlist(&merged.id, &own_ids).await?;
        bill_many(ledger, native, ProviderOp::PlaylistItemInsert, own_ids.len()).await?;
    }

    let mut matched_ids = Vec::new();
    let mut unmatched = 0usize;
    for item in opposite_items.iter().filter(|item| !item.unplayable) {
        bill(ledger, native, ProviderOp::Search).await?;
        match native.search_auto(&item.title, &item.artist).await? {
            Some(hit) => matched_ids.push(hit.target_id),
            None => {
                info!(track = %item.title, artist = %item.artist, "merge: no suitable match");
                unmatched += 1;
            }
        }
    }
    let matched = matched_ids.len();
    if !matched_ids.is_empty() {
        native.add_to_playlist(&merged.id, &matched_ids).await?;
        bill_many(ledger, native, ProviderOp::PlaylistItemInsert, matched_ids.len()).await?;
    }

    Ok((own_ids.len(), matched, unmatched))
}

async fn run_finalize(state: &AppState, job_id: Uuid) -> Result<()> {
    let Some(job) = state.store.get(job_id).await? else {
        error!(%job_id, "finalize: job not found");
        return Ok(());
    };
    if job.status != JobStatus::Finalizing {
        warn!(%job_id, status = %job.status, "finalize: job is not finalizing, skipping redelivery");
        return Ok(());
    }

    match finalize_job(state, &job).await {
        Ok(added) => {
            info!(%job_id, added, "finalize: target playlist written");
            settle(
                state,
                job_id,
                JobStatus::Finalizing,
                JobStatus::Completed,
                JobPatch::default(),
            )
            .await;
        }
        Err(e) => {
            error!(%job_id, "finalize: failed: {e}");
            settle(
                state,
                job_id,
                JobStatus::Finalizing,
                JobStatus::Error,
                JobPatch::with_error(e.to_string()),
            )
            .await;
        }
    }
    Ok(())
}

async fn finalize_job(
    state: &AppState,
    job: &crate::types_jobs::JobRecord,
) -> Result<usize, PipelineError> {
    // Re-validate the stored result on the way out.
    let songs = match job.outcome().map_err(crate::job_store::StoreError::from)? {
        Some(JobOutcome::Sync { songs }) => songs,
        // Merge jobs mutate the playlists during the run; nothing left to do.
        Some(JobOutcome::Merge { .. }) | None => return Ok(0),
    };

    let target_ids: Vec<String> = songs
        .iter()
        .filter(|song| song.status == DecisionStatus::Found)
        .filter_map(|song| song.target_id.clone())
        .collect();
    if target_ids.is_empty() {
        return Ok(0);
    }

    let target_kind = match job.job_type {
        JobType::SyncSpToYt => ProviderKind::Youtube,
        JobType::SyncYtToSp => ProviderKind::Spotify,
        JobType::Merge => return Ok(0),
    };
    let target = state.providers.provider(target_kind, &job.user_id).await?;

    let playlist =
        pipeline::resolve_or_create_target(target.as_ref(), state.ledger.as_ref(), &job.playlist_name)
            .await?;
    target.add_to_playlist(&playlist.id, &target_ids).await?;
    bill_many(
        state.ledger.as_ref(),
        target.as_ref(),
        ProviderOp::PlaylistItemInsert,
        target_ids.len(),
    )
    .await?;

    Ok(target_ids.len())
}

/// The reaper: error out stuck jobs, then garbage-collect terminal ones.
/// Both steps are idempotent, so redelivery is harmless.
async fn run_cleanup(state: &AppState) -> Result<()> {
    let now = Utc::now();

    let stale_cutoff = now - Duration::seconds(state.config.stale_after_secs);
    let swept = state.store.sweep_stale(stale_cutoff).await?;
    for job_id in &swept {
        warn!(%job_id, "cleanup: timed out stuck job");
    }

    let gc_cutoff = now - Duration::seconds(state.config.terminal_ttl_secs);
    let deleted = state.store.delete_terminal_before(gc_cutoff).await?;

    if !swept.is_empty() || deleted > 0 {
        info!(swept = swept.len(), deleted, "cleanup: finished");
    }
    Ok(())
}
