//! Item Pipeline: one item end-to-end.
//!
//! ```text
//! known? ──▶ skip ledger? ──▶ metadata ──▶ transcript ──▶ summarize ──▶ persist
//!   │             │                            │
//!   ▼             ▼                            ▼
//! skipped     skipped(recorded)       skipped(no_transcript) + SkipRecord
//! ```
//!
//! Skips are durable and never retried automatically. Failures (network,
//! timeout, parse, store errors) are returned as [`Outcome::Failed`] and
//! leave no trace in the skip ledger, so the next run tries again.

use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::models::{Item, ItemRef, Outcome, SkipReason, SkipRecord};
use crate::store::Store;
use crate::traits::Collaborators;

/// Per-call options for [`ItemPipeline::process`].
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Check the Item Store first. Batch runs pass `false` because the
    /// dedup filter already removed known items.
    pub skip_if_known: bool,
    /// Source the item is ingested under. Defaults to the owner name
    /// reported by the metadata collaborator.
    pub source_id: Option<String>,
}

pub struct ItemPipeline {
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    config: PipelineConfig,
}

/// Runs `fut` with a deadline; expiry becomes an ordinary error.
pub(crate) async fn with_timeout<T>(
    what: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => bail!("{} timed out after {}s", what, limit.as_secs()),
    }
}

impl ItemPipeline {
    pub fn new(store: Arc<dyn Store>, collaborators: Collaborators, config: PipelineConfig) -> Self {
        Self {
            store,
            collaborators,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes one item. Never returns an error: every failure is
    /// folded into [`Outcome::Failed`].
    pub async fn process(&self, item: &ItemRef, opts: &ProcessOptions) -> Outcome {
        match self.try_process(item, opts).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(item_id = %item.id, error = %message, "item failed");
                self.collaborators
                    .events
                    .log_event(
                        "item_failed",
                        &format!("Failed to ingest {}", item.url),
                        Some(json!({ "item_id": item.id, "error": message })),
                    )
                    .await;
                Outcome::Failed { message }
            }
        }
    }

    async fn try_process(&self, item: &ItemRef, opts: &ProcessOptions) -> Result<Outcome> {
        if opts.skip_if_known && self.store.item_exists(&item.url).await? {
            tracing::debug!(item_id = %item.id, "already ingested");
            return Ok(Outcome::skipped(SkipReason::AlreadyProcessed));
        }

        if let Some(skip) = self.store.get_skip(&item.id).await? {
            tracing::debug!(item_id = %item.id, reason = %skip.reason, "previously skipped");
            return Ok(Outcome::skipped(skip.reason));
        }

        let timeout = self.config.call_timeout();

        let metadata = with_timeout(
            "metadata fetch",
            timeout,
            self.collaborators.metadata.fetch_item_metadata(&item.url),
        )
        .await?;

        let title = if metadata.title.trim().is_empty() {
            item.title.clone()
        } else {
            metadata.title.clone()
        };
        let source_id = opts
            .source_id
            .clone()
            .unwrap_or_else(|| metadata.owner_name.clone());

        let transcript = with_timeout(
            "transcript fetch",
            timeout,
            self.collaborators.transcripts.fetch_transcript(&item.url),
        )
        .await?;

        let transcript = match transcript {
            Some(text) if text.chars().count() >= self.config.min_transcript_chars => text,
            _ => {
                self.store
                    .record_skip(&SkipRecord {
                        item_id: item.id.clone(),
                        canonical_url: item.url.clone(),
                        source_id: source_id.clone(),
                        title: title.clone(),
                        reason: SkipReason::NoTranscript,
                    })
                    .await?;
                tracing::info!(item_id = %item.id, %source_id, "no transcript, skipped");
                self.collaborators
                    .events
                    .log_event(
                        "item_skipped",
                        &format!("No transcript for {}", item.url),
                        Some(json!({ "item_id": item.id, "reason": "no_transcript" })),
                    )
                    .await;
                return Ok(Outcome::skipped(SkipReason::NoTranscript));
            }
        };

        let summary = match &self.collaborators.summarizer {
            Some(summarizer) => {
                let excerpt = excerpt(&transcript, self.config.transcript_excerpt_chars);
                Some(
                    with_timeout(
                        "summarization",
                        timeout,
                        summarizer.summarize(&title, &metadata.owner_name, &excerpt),
                    )
                    .await?,
                )
            }
            None => None,
        };

        let new_item = Item {
            id: item.id.clone(),
            source_id,
            canonical_url: item.url.clone(),
            title,
            owner_name: Some(metadata.owner_name).filter(|o| !o.is_empty()),
            transcript,
            summary: summary.as_ref().map(|s| s.summary.clone()),
            highlight: summary.map(|s| s.highlight),
            publish_date: metadata.publish_date,
            ingested_at: Utc::now(),
        };

        // Another job may have won the race for this URL
        if !self.store.insert_item(&new_item).await? {
            return Ok(Outcome::skipped(SkipReason::AlreadyProcessed));
        }

        tracing::info!(item_id = %new_item.id, source_id = %new_item.source_id, "item ingested");
        self.collaborators
            .events
            .log_event(
                "item_ingested",
                &format!("Ingested {}", new_item.title),
                Some(json!({ "item_id": new_item.id, "source_id": new_item.source_id })),
            )
            .await;

        Ok(Outcome::Success {
            item: Box::new(new_item),
        })
    }

    /// Summarizes a stored item that has none yet.
    ///
    /// Returns `Ok(false)` when summarization is disabled.
    pub async fn enrich(&self, item: &Item) -> Result<bool> {
        let Some(summarizer) = &self.collaborators.summarizer else {
            return Ok(false);
        };

        let excerpt = excerpt(&item.transcript, self.config.transcript_excerpt_chars);
        let owner = item.owner_name.as_deref().unwrap_or(&item.source_id);
        let summary = with_timeout(
            "summarization",
            self.config.call_timeout(),
            summarizer.summarize(&item.title, owner, &excerpt),
        )
        .await?;

        self.store
            .set_item_summary(&item.canonical_url, &summary)
            .await?;
        Ok(true)
    }
}

fn excerpt(transcript: &str, max_chars: usize) -> String {
    transcript.chars().take(max_chars).collect()
}
