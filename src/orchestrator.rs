//! Batch Orchestrator: one source request as a tracked job.
//!
//! ```text
//! starting ─▶ fetching_items ─▶ processing ─▶ completed
//!                   │                │
//!                   └──────┬─────────┘ (listing, identity or dedup error)
//!                          ▼
//!                        error
//! ```
//!
//! Items are processed one at a time with a fixed pause between them.
//! The pause is the rate limiter for the upstream collaborators. A failed
//! item is recorded in the job and the loop moves on; only failures before
//! processing starts end the job in `error`.

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::dedup::filter_new;
use crate::jobs::{spawn_supervised, JobHandle, JobRegistry, JobSnapshot};
use crate::pipeline::{with_timeout, ItemPipeline, ProcessOptions};
use crate::sources::{bind_source, resolve_source_identity, ResolvedSource};
use crate::store::SourceObservation;

/// A request to ingest the items of one source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRequest {
    pub source_url: String,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Files items under this source instead of resolving one from the URL.
    #[serde(default)]
    pub source_id: Option<String>,
}

fn default_max_items() -> usize {
    50
}

pub struct BatchOrchestrator {
    pipeline: Arc<ItemPipeline>,
    registry: Arc<JobRegistry>,
}

impl BatchOrchestrator {
    pub fn new(pipeline: Arc<ItemPipeline>, registry: Arc<JobRegistry>) -> Self {
        Self { pipeline, registry }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Registers a job and starts it in the background. Returns the job
    /// ID as soon as the job exists; the caller polls the registry.
    pub fn submit(&self, request: SourceRequest) -> String {
        let handle = self.registry.create(&request.source_url);
        let job_id = handle.id().to_string();
        let pipeline = self.pipeline.clone();

        spawn_supervised(self.registry.clone(), job_id.clone(), async move {
            run_job(&pipeline, &handle, &request).await;
        });

        job_id
    }

    /// Runs a job to completion on the current task and returns its final
    /// state. Used by the CLI.
    pub async fn run_foreground(&self, request: SourceRequest) -> JobSnapshot {
        let handle = self.registry.create(&request.source_url);
        run_job(&self.pipeline, &handle, &request).await;
        handle.snapshot()
    }
}

/// Drives one job from `starting` to a terminal state.
pub async fn run_job(pipeline: &ItemPipeline, job: &JobHandle, request: &SourceRequest) {
    let job_id = job.id().to_string();
    let store = pipeline.store().as_ref();
    let events = &pipeline.collaborators().events;
    let source_url = request.source_url.as_str();

    tracing::info!(%job_id, %source_url, max_items = request.max_items, "job started");
    job.start_fetching();

    let listing = with_timeout(
        "source listing",
        pipeline.config().listing_timeout(),
        pipeline
            .collaborators()
            .lister
            .list_source_items(source_url, request.max_items),
    )
    .await;

    let candidates = match listing {
        Ok(candidates) => candidates,
        Err(e) => {
            let message = format!("Failed to list source items: {:#}", e);
            fail_job(pipeline, job, source_url, message).await;
            return;
        }
    };
    let fetched_total = candidates.len();

    let source: Option<ResolvedSource> =
        match resolve_source_identity(store, source_url, request.source_id.as_deref()).await {
            Ok(source) => source,
            Err(e) => {
                let message = format!("Failed to resolve source identity: {:#}", e);
                fail_job(pipeline, job, source_url, message).await;
                return;
            }
        };
    let source_id = source.as_ref().map(|s| s.source_id.clone());

    let remaining = match filter_new(store, candidates, source_id.as_deref()).await {
        Ok(remaining) => remaining,
        Err(e) => {
            let message = format!("Failed to filter known items: {:#}", e);
            fail_job(pipeline, job, source_url, message).await;
            return;
        }
    };

    let total = remaining.len();
    tracing::info!(
        %job_id,
        source_id = source_id.as_deref().unwrap_or("-"),
        origin = ?source.as_ref().map(|s| s.origin),
        fetched = fetched_total,
        new = total,
        "processing new items"
    );
    job.start_processing(total);

    let opts = ProcessOptions {
        skip_if_known: false,
        source_id: source_id.clone(),
    };
    let delay = pipeline.config().item_delay();
    let mut source_bound = false;

    for (index, item) in remaining.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        job.set_current_item(&item.title);
        let outcome = pipeline.process(item, &opts).await;

        if outcome.is_success() && !source_bound {
            source_bound = true;
            if let Some(source) = &source {
                if let Err(e) = bind_source(store, source, source_url, fetched_total).await {
                    tracing::warn!(%job_id, source_id = %source.source_id, error = %e, "failed to bind source url");
                }
            }
        }

        job.record(item, &outcome);
    }

    let progress = job.snapshot();
    let visited = progress.processed + progress.skipped + progress.failed;

    if let Some(source_id) = &source_id {
        if total == 0 || visited >= total {
            if let Err(e) = reconcile_source(pipeline, source_id).await {
                tracing::warn!(%job_id, %source_id, error = %e, "failed to reconcile source totals");
            }
        }
    }

    job.complete();
    tracing::info!(
        %job_id,
        processed = progress.processed,
        skipped = progress.skipped,
        failed = progress.failed,
        "job completed"
    );
    events
        .log_event(
            "job_completed",
            &format!("Ingested {} new items from {}", progress.processed, source_url),
            Some(json!({
                "job_id": job_id,
                "source_id": source_id,
                "total": total,
                "processed": progress.processed,
                "skipped": progress.skipped,
                "failed": progress.failed,
            })),
        )
        .await;
}

/// Resets the known total to what is actually ingested and stamps the scan.
async fn reconcile_source(pipeline: &ItemPipeline, source_id: &str) -> anyhow::Result<()> {
    let store = pipeline.store();
    if store.get_source(source_id).await?.is_none() {
        return Ok(());
    }

    let ingested = store.count_items_for_source(source_id).await?;
    store
        .record_scan(
            source_id,
            &SourceObservation {
                total_items: ingested,
                newest_publish_date: None,
                scanned_at: Utc::now(),
            },
        )
        .await
}

async fn fail_job(pipeline: &ItemPipeline, job: &JobHandle, source_url: &str, message: String) {
    tracing::warn!(job_id = %job.id(), %source_url, error = %message, "job failed");
    pipeline
        .collaborators()
        .events
        .log_event(
            "job_failed",
            &format!("Job for {} failed", source_url),
            Some(json!({ "job_id": job.id(), "error": message })),
        )
        .await;
    job.fail(message);
}
