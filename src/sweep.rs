//! Scheduled Sweep.
//!
//! Walks every registered source that has a URL, asks the sync checker
//! whether it has new items, and ingests a bounded number of them:
//! only the newest `recent_window` items are listed and at most
//! `max_items_per_source` are processed per source. One source failing
//! never stops the sweep; its error lands in the report.
//!
//! A bounded enrichment pass then summarizes stored items that have no
//! summary yet.
//!
//! Sweeps are not jobs: they report through [`SweepReport`] and the
//! event sink only.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::SweepConfig;
use crate::dedup::filter_new;
use crate::models::Outcome;
use crate::pipeline::{with_timeout, ItemPipeline, ProcessOptions};
use crate::sync_check::SyncChecker;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sources_checked: usize,
    pub new_items_found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub enriched: usize,
    pub errors: Vec<String>,
}

/// Clears the overlap flag when the sweep ends, including by panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Sweeper {
    pipeline: Arc<ItemPipeline>,
    checker: SyncChecker,
    config: SweepConfig,
    running: AtomicBool,
}

impl Sweeper {
    pub fn new(pipeline: Arc<ItemPipeline>, config: SweepConfig) -> Self {
        Self {
            checker: SyncChecker::new(pipeline.clone(), config.clone()),
            pipeline,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn checker(&self) -> &SyncChecker {
        &self.checker
    }

    /// Runs a sweep unless one is already in progress, in which case
    /// `None` is returned immediately.
    pub async fn try_run(&self) -> Result<Option<SweepReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("sweep already running, not starting another");
            return Ok(None);
        }

        let _guard = RunningGuard(&self.running);
        self.run().await.map(Some)
    }

    /// One full sweep over all registered sources.
    pub async fn run(&self) -> Result<SweepReport> {
        let store = self.pipeline.store();
        let events = &self.pipeline.collaborators().events;
        let mut report = SweepReport::default();

        let sources = store.list_sources().await?;
        tracing::info!(sources = sources.len(), "sweep started");

        for source in sources {
            let Some(source_url) = source.source_url.clone() else {
                continue;
            };
            report.sources_checked += 1;

            if let Err(e) = self.sweep_source(&source.source_id, &source_url, &mut report).await {
                let message = format!("{}: {:#}", source.source_id, e);
                tracing::warn!(source_id = %source.source_id, error = %e, "sweep failed for source");
                report.errors.push(message);
            }
        }

        report.enriched = self.enrich_pending(&mut report.errors).await;

        tracing::info!(
            sources_checked = report.sources_checked,
            new_items_found = report.new_items_found,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            enriched = report.enriched,
            errors = report.errors.len(),
            "sweep finished"
        );
        events
            .log_event(
                "sweep_completed",
                &format!(
                    "Sweep checked {} sources, ingested {} items",
                    report.sources_checked, report.processed
                ),
                serde_json::to_value(&report).ok(),
            )
            .await;

        Ok(report)
    }

    async fn sweep_source(
        &self,
        source_id: &str,
        source_url: &str,
        report: &mut SweepReport,
    ) -> Result<()> {
        let decision = self.checker.needs_sync(source_id).await?;
        if !decision.has_new {
            return Ok(());
        }

        let listing = with_timeout(
            "source listing",
            self.pipeline.config().listing_timeout(),
            self.pipeline
                .collaborators()
                .lister
                .list_source_items(source_url, self.config.recent_window),
        )
        .await?;

        let mut fresh = filter_new(self.pipeline.store().as_ref(), listing, Some(source_id)).await?;
        report.new_items_found += fresh.len();
        fresh.truncate(self.config.max_items_per_source);

        if fresh.is_empty() {
            return Ok(());
        }
        tracing::info!(%source_id, items = fresh.len(), reason = ?decision.reason, "sweeping new items");

        let opts = ProcessOptions {
            skip_if_known: false,
            source_id: Some(source_id.to_string()),
        };
        let delay = self.pipeline.config().item_delay();

        for (index, item) in fresh.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.pipeline.process(item, &opts).await {
                Outcome::Success { .. } => report.processed += 1,
                Outcome::Skipped { .. } => report.skipped += 1,
                Outcome::Failed { .. } => report.failed += 1,
            }
        }

        Ok(())
    }

    async fn enrich_pending(&self, errors: &mut Vec<String>) -> usize {
        if self.pipeline.collaborators().summarizer.is_none() || self.config.enrich_limit == 0 {
            return 0;
        }

        let pending = match self
            .pipeline
            .store()
            .items_missing_summary(self.config.enrich_limit)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                errors.push(format!("enrichment: {:#}", e));
                return 0;
            }
        };

        let mut enriched = 0;
        for item in &pending {
            match self.pipeline.enrich(item).await {
                Ok(true) => enriched += 1,
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "enrichment failed");
                    errors.push(format!("enrich {}: {:#}", item.id, e));
                }
            }
        }
        enriched
    }
}

/// Spawns the periodic sweep loop. The first tick fires after one full
/// interval so startup is not delayed by a sweep.
pub fn spawn_sweep_scheduler(sweeper: Arc<Sweeper>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let run = {
                let sweeper = sweeper.clone();
                tokio::spawn(async move { sweeper.try_run().await })
            };
            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("sweep task died: {}", e)),
            };
            match result {
                Ok(Some(report)) => {
                    if !report.errors.is_empty() {
                        tracing::warn!(errors = ?report.errors, "scheduled sweep finished with errors");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "scheduled sweep failed");
                    sweeper
                        .pipeline
                        .collaborators()
                        .events
                        .log_event("sweep_failed", "Scheduled sweep failed", Some(json!({ "error": format!("{:#}", e) })))
                        .await;
                }
            }
        }
    })
}
