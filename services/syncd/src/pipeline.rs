//! The matching pipeline: walk a source playlist, search the target catalog
//! for each track, and emit one decision per track, skipping what the
//! target playlist already holds.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::job_store::StoreError;
use crate::provider::{PlaylistInfo, Provider, ProviderError, ProviderOp};
use crate::quota::{bill, QuotaLedger};
use crate::types_jobs::TrackDecision;

/// The target side's create-then-read is not read-your-writes consistent;
/// poll a few times before trusting the id from the create call.
const CREATE_POLL_ATTEMPTS: u32 = 5;
const CREATE_POLL_DELAY: Duration = Duration::from_millis(1500);

pub const UNPLAYABLE_REASON: &str = "Unplayable source item.";
pub const NO_MATCH_REASON: &str = "No acceptable match found.";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Could not find or access playlist '{0}'")]
    SourceNotFound(String),

    #[error("song_limit must not be negative (got {0})")]
    NegativeSongLimit(i64),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Run one sync: enumerate `playlist_name` on `source`, match each track on
/// `target`, and return the decisions in source order.
pub async fn sync_playlist(
    source: &dyn Provider,
    target: &dyn Provider,
    ledger: &dyn QuotaLedger,
    playlist_name: &str,
    song_limit: Option<i64>,
) -> Result<Vec<TrackDecision>, PipelineError> {
    if let Some(limit) = song_limit {
        if limit < 0 {
            return Err(PipelineError::NegativeSongLimit(limit));
        }
    }

    bill(ledger, source, ProviderOp::PlaylistLookup).await?;
    let source_playlist = source
        .get_playlist_by_name(playlist_name)
        .await?
        .ok_or_else(|| PipelineError::SourceNotFound(playlist_name.to_string()))?;
    info!(
        source = %source.kind(),
        playlist = %source_playlist.title,
        tracks = source_playlist.track_count,
        "pipeline: resolved source playlist"
    );

    let target_playlist = resolve_or_create_target(target, ledger, playlist_name).await?;

    // Everything already on the target side, keyed by normalized title.
    bill(ledger, target, ProviderOp::PlaylistItemsPage).await?;
    let existing: HashSet<String> = target
        .list_playlist_items(&target_playlist.id)
        .await?
        .iter()
        .map(|item| trackmatch::dedup_key(&item.title))
        .collect();
    debug!(existing = existing.len(), "pipeline: collected target dedup set");

    bill(ledger, source, ProviderOp::PlaylistItemsPage).await?;
    let mut items = source.list_playlist_items(&source_playlist.id).await?;
    if let Some(limit) = song_limit {
        if limit > 0 && (limit as usize) < items.len() {
            info!(
                limit,
                total = items.len(),
                "pipeline: truncating source items to the reserved budget"
            );
            items.truncate(limit as usize);
        }
    }

    let mut decisions = Vec::new();
    for item in &items {
        if item.unplayable {
            decisions.push(TrackDecision::not_found(
                &item.title,
                &item.artist,
                UNPLAYABLE_REASON,
            ));
            continue;
        }

        bill(ledger, target, ProviderOp::Search).await?;
        match target.search_auto(&item.title, &item.artist).await? {
            Some(hit) => {
                if existing.contains(&trackmatch::dedup_key(&hit.matched_title)) {
                    debug!(track = %item.title, "pipeline: duplicate of existing target item, skipping");
                    continue;
                }
                decisions.push(TrackDecision::found(
                    &item.title,
                    &item.artist,
                    hit.target_id,
                    hit.matched_title,
                    hit.matched_artist,
                ));
            }
            None => {
                decisions.push(TrackDecision::not_found(
                    &item.title,
                    &item.artist,
                    NO_MATCH_REASON,
                ));
            }
        }
    }

    Ok(decisions)
}

/// Resolve the target playlist, creating it when absent. After a create,
/// poll until the new playlist is visible to reads.
pub(crate) async fn resolve_or_create_target(
    target: &dyn Provider,
    ledger: &dyn QuotaLedger,
    name: &str,
) -> Result<PlaylistInfo, PipelineError> {
    bill(ledger, target, ProviderOp::PlaylistLookup).await?;
    if let Some(info) = target.get_playlist_by_name(name).await? {
        return Ok(info);
    }

    info!(target = %target.kind(), playlist = name, "pipeline: creating target playlist");
    bill(ledger, target, ProviderOp::PlaylistCreate).await?;
    let created_id = target.create_playlist(name).await?;

    for attempt in 1..=CREATE_POLL_ATTEMPTS {
        sleep(CREATE_POLL_DELAY).await;
        bill(ledger, target, ProviderOp::PlaylistLookup).await?;
        if let Some(info) = target.get_playlist_by_name(name).await? {
            info!(attempt, playlist = name, "pipeline: created playlist became visible");
            return Ok(info);
        }
        debug!(attempt, playlist = name, "pipeline: created playlist not visible yet");
    }

    // The create call did return an id; trust it over the laggy listing.
    warn!(playlist = name, "pipeline: created playlist never showed up in listings");
    Ok(PlaylistInfo {
        id: created_id,
        title: name.to_string(),
        track_count: 0,
    })
}
