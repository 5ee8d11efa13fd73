//! In-memory [`Store`] implementation for tests and dry runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Locks are never held
//! across an await point.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Item, ItemSummary, SkipRecord, SourceRecord};

use super::{SourceObservation, Store};

/// In-memory store. Items are keyed by canonical URL.
#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<HashMap<String, Item>>,
    skips: RwLock<HashMap<String, SkipRecord>>,
    sources: RwLock<HashMap<String, SourceRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_count(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn skip_count(&self) -> usize {
        self.skips.read().map(|skips| skips.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn item_exists(&self, canonical_url: &str) -> Result<bool> {
        Ok(self.items.read().map_err(poisoned)?.contains_key(canonical_url))
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(urls
            .iter()
            .filter(|url| items.contains_key(url.as_str()))
            .cloned()
            .collect())
    }

    async fn insert_item(&self, item: &Item) -> Result<bool> {
        let mut items = self.items.write().map_err(poisoned)?;
        if items.contains_key(&item.canonical_url) {
            return Ok(false);
        }
        items.insert(item.canonical_url.clone(), item.clone());
        Ok(true)
    }

    async fn count_items_for_source(&self, source_id: &str) -> Result<i64> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(items.values().filter(|i| i.source_id == source_id).count() as i64)
    }

    async fn newest_publish_date_for_source(
        &self,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(items
            .values()
            .filter(|i| i.source_id == source_id)
            .filter_map(|i| i.publish_date)
            .max())
    }

    async fn items_missing_summary(&self, limit: usize) -> Result<Vec<Item>> {
        let items = self.items.read().map_err(poisoned)?;
        let mut missing: Vec<Item> = items
            .values()
            .filter(|i| i.summary.is_none())
            .cloned()
            .collect();
        missing.sort_by_key(|i| i.ingested_at);
        missing.truncate(limit);
        Ok(missing)
    }

    async fn set_item_summary(&self, canonical_url: &str, summary: &ItemSummary) -> Result<()> {
        let mut items = self.items.write().map_err(poisoned)?;
        if let Some(item) = items.get_mut(canonical_url) {
            item.summary = Some(summary.summary.clone());
            item.highlight = Some(summary.highlight.clone());
        }
        Ok(())
    }

    async fn get_skip(&self, item_id: &str) -> Result<Option<SkipRecord>> {
        Ok(self.skips.read().map_err(poisoned)?.get(item_id).cloned())
    }

    async fn record_skip(&self, record: &SkipRecord) -> Result<()> {
        self.skips
            .write()
            .map_err(poisoned)?
            .insert(record.item_id.clone(), record.clone());
        Ok(())
    }

    async fn skipped_ids(
        &self,
        source_id: Option<&str>,
        item_ids: &[String],
    ) -> Result<HashSet<String>> {
        let skips = self.skips.read().map_err(poisoned)?;
        Ok(item_ids
            .iter()
            .filter(|id| match skips.get(id.as_str()) {
                Some(record) => source_id.map_or(true, |s| record.source_id == s),
                None => false,
            })
            .cloned()
            .collect())
    }

    async fn clear_skips(&self, source_id: &str) -> Result<u64> {
        let mut skips = self.skips.write().map_err(poisoned)?;
        let before = skips.len();
        skips.retain(|_, record| record.source_id != source_id);
        Ok((before - skips.len()) as u64)
    }

    async fn get_source(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        Ok(self.sources.read().map_err(poisoned)?.get(source_id).cloned())
    }

    async fn find_source_by_url(&self, source_url: &str) -> Result<Option<SourceRecord>> {
        let sources = self.sources.read().map_err(poisoned)?;
        Ok(sources
            .values()
            .find(|s| s.source_url.as_deref() == Some(source_url))
            .cloned())
    }

    async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let sources = self.sources.read().map_err(poisoned)?;
        let mut all: Vec<SourceRecord> = sources.values().cloned().collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(all)
    }

    async fn bind_source_url(
        &self,
        source_id: &str,
        source_url: &str,
        fetched_total: i64,
    ) -> Result<()> {
        let mut sources = self.sources.write().map_err(poisoned)?;
        let record = sources
            .entry(source_id.to_string())
            .or_insert_with(|| SourceRecord::new(source_id));
        if record.source_url.is_none() {
            record.source_url = Some(source_url.to_string());
        }
        record.total_known_items = record.total_known_items.max(fetched_total);
        Ok(())
    }

    async fn record_scan(&self, source_id: &str, observation: &SourceObservation) -> Result<()> {
        let mut sources = self.sources.write().map_err(poisoned)?;
        let record = sources
            .entry(source_id.to_string())
            .or_insert_with(|| SourceRecord::new(source_id));
        record.total_known_items = observation.total_items;
        if observation.newest_publish_date.is_some() {
            record.newest_known_publish_date = observation.newest_publish_date;
        }
        record.last_scanned_at = Some(observation.scanned_at);
        Ok(())
    }
}
