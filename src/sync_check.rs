//! Sync Checker: does a known source have items we have not ingested?
//!
//! Branches are evaluated in order and the first that applies decides:
//!
//! | Reason | Condition | `has_new` |
//! |--------|-----------|-----------|
//! | `count_gap` | live total exceeds ingested count | true |
//! | `newer_remote_date` / `up_to_date` | both newest dates known | live date is later |
//! | `assumed_stale` | ingested items carry no dates, live source non-empty | true |
//! | `up_to_date` | otherwise | false |
//!
//! The live side costs two collaborator calls: one capped bulk listing
//! and one metadata lookup for the newest listed item. Every check
//! writes what it observed back to the SourceRecord.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::SweepConfig;
use crate::pipeline::{with_timeout, ItemPipeline};
use crate::store::SourceObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    /// More items live than ingested.
    CountGap,
    /// Same counts, but the newest live item is newer than anything ingested.
    NewerRemoteDate,
    /// Counts match and ingested items have no dates to compare.
    AssumedStale,
    UpToDate,
}

/// Outcome of one sync check, with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDecision {
    pub source_id: String,
    pub has_new: bool,
    pub missing_count: i64,
    pub latest_remote_date: Option<DateTime<Utc>>,
    pub reason: SyncReason,
    pub live_total: i64,
    pub ingested_count: i64,
    pub recorded_newest_date: Option<DateTime<Utc>>,
}

/// Applies the branch table to already-gathered inputs.
pub fn decide(
    source_id: &str,
    live_total: i64,
    ingested_count: i64,
    latest_remote_date: Option<DateTime<Utc>>,
    recorded_newest_date: Option<DateTime<Utc>>,
) -> SyncDecision {
    let gap = live_total - ingested_count;
    let missing_count = gap.max(0);

    let (has_new, reason) = if gap > 0 {
        (true, SyncReason::CountGap)
    } else if let (Some(live), Some(recorded)) = (latest_remote_date, recorded_newest_date) {
        if live > recorded {
            (true, SyncReason::NewerRemoteDate)
        } else {
            (false, SyncReason::UpToDate)
        }
    } else if ingested_count > 0 && recorded_newest_date.is_none() && live_total > 0 {
        (true, SyncReason::AssumedStale)
    } else {
        (false, SyncReason::UpToDate)
    };

    SyncDecision {
        source_id: source_id.to_string(),
        has_new,
        missing_count,
        latest_remote_date,
        reason,
        live_total,
        ingested_count,
        recorded_newest_date,
    }
}

pub struct SyncChecker {
    pipeline: Arc<ItemPipeline>,
    config: SweepConfig,
}

impl SyncChecker {
    pub fn new(pipeline: Arc<ItemPipeline>, config: SweepConfig) -> Self {
        Self { pipeline, config }
    }

    /// Checks one registered source against its live listing.
    ///
    /// Errors if the source is unknown, has no URL yet, or its listing
    /// fails. A failed metadata lookup only costs the date comparison.
    pub async fn needs_sync(&self, source_id: &str) -> Result<SyncDecision> {
        let store = self.pipeline.store();
        let collaborators = self.pipeline.collaborators();
        let pipeline_config = self.pipeline.config();

        let record = store
            .get_source(source_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown source: {}", source_id))?;
        let source_url = record
            .source_url
            .ok_or_else(|| anyhow!("Source {} has no known URL yet", source_id))?;

        let listing = with_timeout(
            "source listing",
            pipeline_config.listing_timeout(),
            collaborators
                .lister
                .list_source_items(&source_url, self.config.sync_listing_cap),
        )
        .await?;
        let live_total = listing.len() as i64;

        let latest_remote_date = match listing.first() {
            Some(newest) => {
                let metadata = with_timeout(
                    "metadata fetch",
                    pipeline_config.call_timeout(),
                    collaborators.metadata.fetch_item_metadata(&newest.url),
                )
                .await;
                match metadata {
                    Ok(metadata) => metadata.publish_date,
                    Err(e) => {
                        tracing::warn!(%source_id, item_id = %newest.id, error = %e, "newest item metadata unavailable");
                        None
                    }
                }
            }
            None => None,
        };

        let ingested_count = store.count_items_for_source(source_id).await?;
        let recorded_newest_date = store.newest_publish_date_for_source(source_id).await?;

        store
            .record_scan(
                source_id,
                &SourceObservation {
                    total_items: live_total,
                    newest_publish_date: latest_remote_date,
                    scanned_at: Utc::now(),
                },
            )
            .await?;

        let decision = decide(
            source_id,
            live_total,
            ingested_count,
            latest_remote_date,
            recorded_newest_date,
        );
        tracing::info!(
            %source_id,
            has_new = decision.has_new,
            reason = ?decision.reason,
            live_total,
            ingested_count,
            "sync check"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn count_gap_wins_regardless_of_dates() {
        let d = decide("s", 120, 100, Some(day(1)), Some(day(9)));
        assert!(d.has_new);
        assert_eq!(d.missing_count, 20);
        assert_eq!(d.reason, SyncReason::CountGap);
    }

    #[test]
    fn newer_remote_date_with_equal_counts() {
        let d = decide("s", 100, 100, Some(day(9)), Some(day(1)));
        assert!(d.has_new);
        assert_eq!(d.missing_count, 0);
        assert_eq!(d.reason, SyncReason::NewerRemoteDate);
    }

    #[test]
    fn same_or_older_remote_date_is_up_to_date() {
        let d = decide("s", 100, 100, Some(day(1)), Some(day(1)));
        assert!(!d.has_new);
        assert_eq!(d.reason, SyncReason::UpToDate);
    }

    #[test]
    fn undated_history_is_assumed_stale() {
        let d = decide("s", 100, 100, None, None);
        assert!(d.has_new);
        assert_eq!(d.missing_count, 0);
        assert_eq!(d.reason, SyncReason::AssumedStale);

        let d = decide("s", 100, 100, Some(day(3)), None);
        assert_eq!(d.reason, SyncReason::AssumedStale);
    }

    #[test]
    fn empty_live_source_is_up_to_date() {
        let d = decide("s", 0, 5, None, None);
        assert!(!d.has_new);
        assert_eq!(d.missing_count, 0);
    }

    #[test]
    fn decision_serializes_reason() {
        let d = decide("s", 3, 1, None, None);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["reason"], "count_gap");
        assert_eq!(json["missingCount"], 2);
        assert_eq!(json["hasNew"], true);
    }
}
