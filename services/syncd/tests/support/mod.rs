//! In-memory doubles for the engine's seams. They honor the same contracts
//! as the Postgres/HTTP implementations (status CAS, ceiling-checked
//! reservation, FIFO claim) so the integration tests exercise real engine
//! code paths with scripted collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use syncd::config::AppConfig;
use syncd::job_store::{JobStore, StoreError, TIMED_OUT_MESSAGE};
use syncd::provider::{
    PlaylistInfo, PlaylistItem, Provider, ProviderError, ProviderFactory, ProviderKind,
    ProviderOp, SearchHit,
};
use syncd::queue::{ClaimedTask, Task, TaskQueue};
use syncd::quota::QuotaLedger;
use syncd::state::{AppState, SharedState};
use syncd::types_jobs::{JobPatch, JobRecord, JobStatus, NewJob};

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        quota_limit: 10_000,
        quota_buffer: 500,
        quota_tz: chrono_tz::America::New_York,
        stale_after_secs: 3_600,
        terminal_ttl_secs: 300,
        cleanup_every: Duration::from_secs(900),
        spotify_client_id: None,
        spotify_client_secret: None,
        yt_client_id: None,
        yt_client_secret: None,
    }
}

// ---- Job store ----

#[derive(Default)]
pub struct MemJobStore {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    transitions: Mutex<Vec<(Uuid, JobStatus, JobStatus)>>,
}

impl MemJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn transitions(&self) -> Vec<(Uuid, JobStatus, JobStatus)> {
        self.transitions.lock().unwrap().clone()
    }

    /// Backdate a job for reaper tests.
    pub fn set_updated_at(&self, job_id: Uuid, at: DateTime<Utc>) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.updated_at = at;
        }
    }
}

#[async_trait]
impl JobStore for MemJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let now = Utc::now();
        let record = JobRecord {
            job_id: job.job_id,
            user_id: job.user_id,
            job_type: job.job_type,
            status: job.status,
            playlist_name: job.playlist_name,
            result: job.result.as_ref().map(serde_json::to_value).transpose()?,
            error: None,
            job_notes: job.job_notes,
            created_at: now,
            updated_at: now,
        };
        self.jobs
            .lock()
            .unwrap()
            .insert(record.job_id, record.clone());
        Ok(record)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn latest(&self, user_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.user_id == user_id)
            .max_by_key(|job| job.created_at)
            .cloned())
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
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != from {
            return Ok(false);
        }
        job.status = to;
        if to == JobStatus::Error {
            job.result = None;
        } else if let Some(result) = &patch.result {
            job.result = Some(serde_json::to_value(result)?);
        }
        if patch.error.is_some() {
            job.error = patch.error;
        }
        if patch.job_notes.is_some() {
            job.job_notes = patch.job_notes;
        }
        job.updated_at = Utc::now();
        self.transitions.lock().unwrap().push((job_id, from, to));
        Ok(true)
    }

    async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut swept = Vec::new();
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.values_mut() {
            if matches!(
                job.status,
                JobStatus::Pending | JobStatus::ReadyToFinalize
            ) && job.updated_at < cutoff
            {
                job.status = JobStatus::Error;
                job.error = Some(TIMED_OUT_MESSAGE.to_string());
                job.result = None;
                job.updated_at = Utc::now();
                swept.push(job.job_id);
            }
        }
        Ok(swept)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}

// ---- Quota ledger ----

#[derive(Default)]
pub struct MemLedger {
    used: Mutex<i64>,
}

impl MemLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl QuotaLedger for MemLedger {
    async fn reserve(&self, required: i64, ceiling: i64) -> Result<bool, StoreError> {
        if required == 0 {
            return Ok(true);
        }
        let mut used = self.used.lock().unwrap();
        if *used + required <= ceiling {
            *used += required;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn consume(&self, units: i64) -> Result<(), StoreError> {
        *self.used.lock().unwrap() += units;
        Ok(())
    }

    async fn used(&self) -> Result<i64, StoreError> {
        Ok(*self.used.lock().unwrap())
    }

    async fn set(&self, value: i64) -> Result<(), StoreError> {
        *self.used.lock().unwrap() = value;
        Ok(())
    }
}

// ---- Task queue ----

#[derive(Default)]
pub struct MemQueue {
    queued: Mutex<VecDeque<(Uuid, Task)>>,
    claimed: Mutex<HashMap<Uuid, Task>>,
    acked: Mutex<Vec<Uuid>>,
}

impl MemQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self, queue: &str) -> Vec<Task> {
        self.queued
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, task)| task.queue() == queue)
            .map(|(_, task)| task.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl TaskQueue for MemQueue {
    async fn enqueue(&self, task: &Task) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.queued.lock().unwrap().push_back((id, task.clone()));
        Ok(id)
    }

    async fn claim(
        &self,
        queue: &str,
        _worker_id: &str,
    ) -> Result<Option<ClaimedTask>, StoreError> {
        let mut queued = self.queued.lock().unwrap();
        let pos = queued.iter().position(|(_, task)| task.queue() == queue);
        Ok(pos.map(|pos| {
            let (id, task) = queued.remove(pos).expect("position just found");
            self.claimed.lock().unwrap().insert(id, task.clone());
            ClaimedTask {
                id,
                task,
                attempts: 1,
            }
        }))
    }

    async fn heartbeat(&self, _task_id: Uuid, _worker_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ack(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.claimed.lock().unwrap().remove(&task_id);
        self.acked.lock().unwrap().push(task_id);
        Ok(())
    }

    async fn retry(&self, task_id: Uuid, _error: &str) -> Result<(), StoreError> {
        // The same message goes to the back of the line.
        if let Some(task) = self.claimed.lock().unwrap().remove(&task_id) {
            self.queued.lock().unwrap().push_back((task_id, task));
        }
        Ok(())
    }
}

// ---- Scripted providers ----

#[derive(Default)]
struct ProviderScript {
    playlists: HashMap<String, PlaylistInfo>,
    items: HashMap<String, Vec<PlaylistItem>>,
    hits: HashMap<String, SearchHit>,
    added: Vec<(String, Vec<String>)>,
    created: u32,
}

/// A provider whose playlists and search results are fixed up front.
#[derive(Clone)]
pub struct ScriptedProvider {
    kind: ProviderKind,
    script: Arc<Mutex<ProviderScript>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            script: Arc::new(Mutex::new(ProviderScript::default())),
        }
    }

    pub fn with_playlist(&self, name: &str, id: &str, items: Vec<PlaylistItem>) -> &Self {
        let mut script = self.script.lock().unwrap();
        script.playlists.insert(
            name.to_lowercase(),
            PlaylistInfo {
                id: id.to_string(),
                title: name.to_string(),
                track_count: items.len() as i64,
            },
        );
        script.items.insert(id.to_string(), items);
        self
    }

    /// Script a playlist whose advertised count differs from its item list
    /// (intake only reads the count).
    pub fn with_counted_playlist(&self, name: &str, id: &str, track_count: i64) -> &Self {
        let mut script = self.script.lock().unwrap();
        script.playlists.insert(
            name.to_lowercase(),
            PlaylistInfo {
                id: id.to_string(),
                title: name.to_string(),
                track_count,
            },
        );
        script.items.insert(id.to_string(), Vec::new());
        self
    }

    pub fn with_hit(&self, track_name: &str, target_id: &str, title: &str, artist: &str) -> &Self {
        self.script.lock().unwrap().hits.insert(
            track_name.to_string(),
            SearchHit {
                target_id: target_id.to_string(),
                matched_title: title.to_string(),
                matched_artist: artist.to_string(),
                title_score: 95.0,
                artist_score: 90.0,
            },
        );
        self
    }

    /// All `add_to_playlist` calls observed so far.
    pub fn added(&self) -> Vec<(String, Vec<String>)> {
        self.script.lock().unwrap().added.clone()
    }
}

pub fn item(title: &str, artist: &str, id: &str) -> PlaylistItem {
    PlaylistItem {
        source_id: Some(id.to_string()),
        title: title.to_string(),
        artist: artist.to_string(),
        unplayable: false,
    }
}

pub fn unplayable_item(title: &str) -> PlaylistItem {
    PlaylistItem {
        source_id: None,
        title: title.to_string(),
        artist: String::new(),
        unplayable: true,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn quota_cost(&self, op: ProviderOp) -> i64 {
        match self.kind {
            ProviderKind::Spotify => 0,
            ProviderKind::Youtube => match op {
                ProviderOp::PlaylistLookup => 1,
                ProviderOp::PlaylistItemsPage => 1,
                ProviderOp::PlaylistCreate => 50,
                ProviderOp::PlaylistItemInsert => 50,
                ProviderOp::Search => 0,
            },
        }
    }

    async fn get_playlist_by_name(
        &self,
        name: &str,
    ) -> Result<Option<PlaylistInfo>, ProviderError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .playlists
            .get(&name.to_lowercase())
            .cloned())
    }

    async fn list_playlist_items(
        &self,
        playlist_id: &str,
    ) -> Result<Vec<PlaylistItem>, ProviderError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .items
            .get(playlist_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_playlist(&self, name: &str) -> Result<String, ProviderError> {
        let mut script = self.script.lock().unwrap();
        script.created += 1;
        let id = format!("{}-pl-{}", self.kind.as_str().to_lowercase(), script.created);
        script.playlists.insert(
            name.to_lowercase(),
            PlaylistInfo {
                id: id.clone(),
                title: name.to_string(),
                track_count: 0,
            },
        );
        script.items.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn add_to_playlist(
        &self,
        playlist_id: &str,
        target_ids: &[String],
    ) -> Result<(), ProviderError> {
        self.script
            .lock()
            .unwrap()
            .added
            .push((playlist_id.to_string(), target_ids.to_vec()));
        Ok(())
    }

    async fn search_auto(
        &self,
        track_name: &str,
        _artist: &str,
    ) -> Result<Option<SearchHit>, ProviderError> {
        Ok(self.script.lock().unwrap().hits.get(track_name).cloned())
    }
}

pub struct StaticProviderFactory {
    pub sp: ScriptedProvider,
    pub yt: ScriptedProvider,
}

#[async_trait]
impl ProviderFactory for StaticProviderFactory {
    async fn provider(
        &self,
        kind: ProviderKind,
        _user_id: &str,
    ) -> Result<Box<dyn Provider>, ProviderError> {
        Ok(match kind {
            ProviderKind::Spotify => Box::new(self.sp.clone()),
            ProviderKind::Youtube => Box::new(self.yt.clone()),
        })
    }
}

// ---- Assembled engine ----

pub struct TestEngine {
    pub state: SharedState,
    pub store: Arc<MemJobStore>,
    pub ledger: Arc<MemLedger>,
    pub queue: Arc<MemQueue>,
    pub sp: ScriptedProvider,
    pub yt: ScriptedProvider,
}

pub fn engine() -> TestEngine {
    let store = MemJobStore::new();
    let ledger = MemLedger::new();
    let queue = MemQueue::new();
    let sp = ScriptedProvider::new(ProviderKind::Spotify);
    let yt = ScriptedProvider::new(ProviderKind::Youtube);

    let state = AppState::new(
        test_config(),
        store.clone(),
        ledger.clone(),
        queue.clone(),
        Arc::new(StaticProviderFactory {
            sp: sp.clone(),
            yt: yt.clone(),
        }),
    );

    TestEngine {
        state,
        store,
        ledger,
        queue,
        sp,
        yt,
    }
}
