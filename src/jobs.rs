//! Job Registry.
//!
//! Long-running ingestion jobs are tracked here and polled by job ID.
//!
//! - Only the [`JobHandle`] returned by [`JobRegistry::create`] can mutate
//!   a job. It is not `Clone`; the orchestrator task owns it.
//! - Status only moves forward:
//!   `starting → fetching_items → processing → completed | error`.
//!   Once terminal, every mutator is a no-op, so repeated polls of a
//!   finished job return identical snapshots.
//! - `results` keeps only the most recent `jobs.result_limit` entries.
//!   The counters stay exact.
//! - Finished jobs are evicted after `jobs.retention_secs`, and the
//!   registry never retains more than `jobs.capacity` finished jobs.
//!   Running jobs are never evicted.
//! - [`spawn_supervised`] runs a job's future as its own task and moves
//!   the job to `error` if that task panics or ends early.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::models::{ItemRef, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    FetchingItems,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Starting => 0,
            JobStatus::FetchingItems => 1,
            JobStatus::Processing => 2,
            JobStatus::Completed | JobStatus::Error => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Skipped,
    Failed,
}

/// One entry of a job's result log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub title: String,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn from_outcome(item: &ItemRef, outcome: &Outcome) -> Self {
        let mut result = JobResult {
            title: item.title.clone(),
            status: ResultStatus::Success,
            id: Some(item.id.clone()),
            reason: None,
            error: None,
        };
        match outcome {
            Outcome::Success { item: stored } => result.title = stored.title.clone(),
            Outcome::Skipped { reason } => {
                result.status = ResultStatus::Skipped;
                result.reason = Some(reason.to_string());
            }
            Outcome::Failed { message } => {
                result.status = ResultStatus::Failed;
                result.error = Some(message.clone());
            }
        }
        result
    }
}

/// Poll view of a job, as served by `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub source_url: String,
    /// Set once the dedup filter has run.
    pub total: Option<usize>,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub current_item: Option<String>,
    pub results: Vec<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct JobEntry {
    id: String,
    status: JobStatus,
    source_url: String,
    total: Option<usize>,
    processed: usize,
    skipped: usize,
    failed: usize,
    current_item: Option<String>,
    results: VecDeque<JobResult>,
    result_limit: usize,
    error: Option<String>,
    finished_at: Option<Instant>,
    last_access: Instant,
}

impl JobEntry {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            source_url: self.source_url.clone(),
            total: self.total,
            processed: self.processed,
            skipped: self.skipped,
            failed: self.failed,
            current_item: self.current_item.clone(),
            results: self.results.iter().cloned().collect(),
            error: self.error.clone(),
        }
    }

    fn visited(&self) -> usize {
        self.processed + self.skipped + self.failed
    }

    fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.current_item = None;
            self.finished_at = Some(Instant::now());
        }
        true
    }
}

fn lock(entry: &Mutex<JobEntry>) -> std::sync::MutexGuard<'_, JobEntry> {
    // A panic while holding the lock leaves the entry consistent enough to
    // report: every mutation is a handful of field writes.
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive write access to one job.
pub struct JobHandle {
    id: String,
    entry: Arc<Mutex<JobEntry>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> JobSnapshot {
        lock(&self.entry).snapshot()
    }

    pub fn is_terminal(&self) -> bool {
        lock(&self.entry).status.is_terminal()
    }

    pub fn start_fetching(&self) {
        lock(&self.entry).advance(JobStatus::FetchingItems);
    }

    /// Enters `processing` with the number of items that will be visited.
    pub fn start_processing(&self, total: usize) {
        let mut job = lock(&self.entry);
        if job.advance(JobStatus::Processing) {
            job.total = Some(total);
        }
    }

    pub fn set_current_item(&self, label: &str) {
        let mut job = lock(&self.entry);
        if !job.status.is_terminal() {
            job.current_item = Some(label.to_string());
        }
    }

    /// Counts one visited item and appends it to the bounded result log.
    pub fn record(&self, item: &ItemRef, outcome: &Outcome) {
        let mut job = lock(&self.entry);
        if job.status != JobStatus::Processing {
            return;
        }
        if let Some(total) = job.total {
            if job.visited() >= total {
                tracing::warn!(job_id = %job.id, "result recorded past job total, ignored");
                return;
            }
        }

        match outcome {
            Outcome::Success { .. } => job.processed += 1,
            Outcome::Skipped { .. } => job.skipped += 1,
            Outcome::Failed { .. } => job.failed += 1,
        }

        job.results.push_back(JobResult::from_outcome(item, outcome));
        while job.results.len() > job.result_limit {
            job.results.pop_front();
        }
    }

    pub fn complete(&self) {
        lock(&self.entry).advance(JobStatus::Completed);
    }

    pub fn fail(&self, message: impl Into<String>) {
        let mut job = lock(&self.entry);
        if job.advance(JobStatus::Error) {
            job.error = Some(message.into());
        }
    }
}

/// In-process registry of jobs, keyed by job ID.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Mutex<JobEntry>>>>,
    config: JobsConfig,
}

impl JobRegistry {
    pub fn new(config: JobsConfig) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Registers a new job in `starting` state.
    pub fn create(&self, source_url: &str) -> JobHandle {
        let id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let entry = Arc::new(Mutex::new(JobEntry {
            id: id.clone(),
            status: JobStatus::Starting,
            source_url: source_url.to_string(),
            total: None,
            processed: 0,
            skipped: 0,
            failed: 0,
            current_item: None,
            results: VecDeque::with_capacity(self.config.result_limit),
            result_limit: self.config.result_limit.max(1),
            error: None,
            finished_at: None,
            last_access: now,
        }));

        let mut jobs = self.jobs.write().unwrap_or_else(|p| p.into_inner());
        self.evict_expired(&mut jobs, now);
        self.make_room(&mut jobs);
        if jobs.len() >= self.config.capacity {
            tracing::warn!(
                capacity = self.config.capacity,
                running = jobs.len(),
                "job registry over capacity with only running jobs"
            );
        }
        jobs.insert(id.clone(), entry.clone());

        JobHandle { id, entry }
    }

    /// Current state of a job, or `None` for unknown or evicted IDs.
    pub fn get(&self, id: &str) -> Option<JobSnapshot> {
        let now = Instant::now();
        let entry = {
            let mut jobs = self.jobs.write().unwrap_or_else(|p| p.into_inner());
            self.evict_expired(&mut jobs, now);
            jobs.get(id).cloned()
        }?;
        let mut job = lock(&entry);
        job.last_access = now;
        Some(job.snapshot())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves a job that is still running to `error`. Used by the
    /// supervisor when a job task dies; returns whether anything changed.
    pub(crate) fn abandon(&self, id: &str, message: &str) -> bool {
        let entry = {
            let jobs = self.jobs.read().unwrap_or_else(|p| p.into_inner());
            jobs.get(id).cloned()
        };
        match entry {
            Some(entry) => {
                let mut job = lock(&entry);
                if job.advance(JobStatus::Error) {
                    job.error = Some(message.to_string());
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    fn evict_expired(&self, jobs: &mut HashMap<String, Arc<Mutex<JobEntry>>>, now: Instant) {
        let retention = self.config.retention();
        jobs.retain(|_, entry| match lock(entry).finished_at {
            Some(finished) => now.duration_since(finished) < retention,
            None => true,
        });
    }

    /// Evicts least recently polled finished jobs until one more fits.
    fn make_room(&self, jobs: &mut HashMap<String, Arc<Mutex<JobEntry>>>) {
        while jobs.len() >= self.config.capacity {
            let oldest = jobs
                .iter()
                .filter_map(|(id, entry)| {
                    let job = lock(entry);
                    job.finished_at.map(|_| (id.clone(), job.last_access))
                })
                .min_by_key(|(_, last_access)| *last_access)
                .map(|(id, _)| id);

            match oldest {
                Some(id) => {
                    jobs.remove(&id);
                }
                None => break,
            }
        }
    }
}

/// Runs a job future under supervision.
///
/// The future runs as its own task. If it panics, is cancelled, or
/// returns without driving the job to a terminal state, the job is moved
/// to `error` so pollers never see it stuck in `processing`.
pub fn spawn_supervised<F>(registry: Arc<JobRegistry>, job_id: String, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let message = match tokio::spawn(task).await {
            Ok(()) => "job ended without reaching a terminal state".to_string(),
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("job crashed: {}", detail)
            }
            Err(_) => "job task was cancelled".to_string(),
        };

        if registry.abandon(&job_id, &message) {
            tracing::error!(%job_id, %message, "job did not finish cleanly");
        }
    })
}
