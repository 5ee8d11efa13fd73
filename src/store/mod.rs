//! Durable state: the Item Store, the Skip Ledger, and the Source Registry.
//!
//! The [`Store`] trait is the seam between the engine and its backing
//! storage. [`sqlite::SqliteStore`] is the production backend;
//! [`memory::InMemoryStore`] backs tests and dry runs.
//!
//! Conflicting writes from concurrent jobs (two jobs upserting the same
//! source, two jobs racing to insert the same item) are settled by the
//! backend's atomic upsert semantics, never by in-process locks held
//! across awaits.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`item_exists`](Store::item_exists) | Has this canonical URL been ingested? |
//! | [`existing_urls`](Store::existing_urls) | Bulk variant for the dedup filter |
//! | [`insert_item`](Store::insert_item) | Persist a newly ingested item (first writer wins) |
//! | [`get_skip`](Store::get_skip) | Recorded skip reason for an item |
//! | [`record_skip`](Store::record_skip) | Write or replace a skip reason |
//! | [`skipped_ids`](Store::skipped_ids) | Bulk variant for the dedup filter |
//! | [`clear_skips`](Store::clear_skips) | Operator retry sweep for one source |
//! | [`bind_source_url`](Store::bind_source_url) | Associate a source with its URL |
//! | [`record_scan`](Store::record_scan) | Store observed source totals |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::{Item, ItemSummary, SkipRecord, SourceRecord};

/// Values observed on the live source during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObservation {
    pub total_items: i64,
    /// `None` keeps whatever date was recorded before.
    pub newest_publish_date: Option<DateTime<Utc>>,
    pub scanned_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── Item Store ──────────────────────────────────────────────────

    async fn item_exists(&self, canonical_url: &str) -> Result<bool>;

    /// Returns the subset of `urls` already ingested, in one read.
    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>>;

    /// Inserts a new item. Returns `false` if the canonical URL was
    /// already present; the stored item is left untouched.
    async fn insert_item(&self, item: &Item) -> Result<bool>;

    async fn count_items_for_source(&self, source_id: &str) -> Result<i64>;

    /// Newest publish date among the source's ingested items, if any carry one.
    async fn newest_publish_date_for_source(
        &self,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Oldest-first list of items that have no summary yet.
    async fn items_missing_summary(&self, limit: usize) -> Result<Vec<Item>>;

    async fn set_item_summary(&self, canonical_url: &str, summary: &ItemSummary) -> Result<()>;

    // ── Skip Ledger ─────────────────────────────────────────────────

    async fn get_skip(&self, item_id: &str) -> Result<Option<SkipRecord>>;

    /// Records a skip, replacing any earlier reason for the same item.
    async fn record_skip(&self, record: &SkipRecord) -> Result<()>;

    /// Returns the subset of `item_ids` with a skip record, in one read.
    /// With `source_id`, only that source's records are considered.
    async fn skipped_ids(
        &self,
        source_id: Option<&str>,
        item_ids: &[String],
    ) -> Result<HashSet<String>>;

    /// Deletes every skip record of one source. Returns how many went.
    async fn clear_skips(&self, source_id: &str) -> Result<u64>;

    // ── Source Registry ─────────────────────────────────────────────

    async fn get_source(&self, source_id: &str) -> Result<Option<SourceRecord>>;

    async fn find_source_by_url(&self, source_url: &str) -> Result<Option<SourceRecord>>;

    async fn list_sources(&self) -> Result<Vec<SourceRecord>>;

    /// Creates the record if missing and sets its URL if it has none.
    /// `total_known_items` is raised to `fetched_total` if that is larger.
    async fn bind_source_url(
        &self,
        source_id: &str,
        source_url: &str,
        fetched_total: i64,
    ) -> Result<()>;

    /// Stores observed totals and stamps `last_scanned_at`, creating the
    /// record if needed.
    async fn record_scan(&self, source_id: &str, observation: &SourceObservation) -> Result<()>;
}
