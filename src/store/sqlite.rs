//! SQLite-backed [`Store`] implementation.
//!
//! Bulk membership checks bind the candidate list as one JSON array and
//! expand it with `json_each`, so a dedup pass is a single statement no
//! matter how many candidates there are.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Item, ItemSummary, SkipReason, SkipRecord, SourceRecord};

use super::{SourceObservation, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
}

fn item_from_row(row: &SqliteRow) -> Item {
    Item {
        id: row.get("item_id"),
        source_id: row.get("source_id"),
        canonical_url: row.get("canonical_url"),
        title: row.get("title"),
        owner_name: row.get("owner_name"),
        transcript: row.get("transcript"),
        summary: row.get("summary"),
        highlight: row.get("highlight"),
        publish_date: from_ts(row.get("publish_date")),
        ingested_at: from_ts(Some(row.get("ingested_at"))).unwrap_or_else(Utc::now),
    }
}

fn skip_from_row(row: &SqliteRow) -> SkipRecord {
    let reason: String = row.get("reason");
    SkipRecord {
        item_id: row.get("item_id"),
        canonical_url: row.get("canonical_url"),
        source_id: row.get("source_id"),
        title: row.get("title"),
        reason: SkipReason::parse(&reason),
    }
}

fn source_from_row(row: &SqliteRow) -> SourceRecord {
    SourceRecord {
        source_id: row.get("source_id"),
        source_url: row.get("source_url"),
        total_known_items: row.get("total_known_items"),
        newest_known_publish_date: from_ts(row.get("newest_known_publish_date")),
        last_scanned_at: from_ts(row.get("last_scanned_at")),
    }
}

const SOURCE_COLUMNS: &str =
    "source_id, source_url, total_known_items, newest_known_publish_date, last_scanned_at";

#[async_trait]
impl Store for SqliteStore {
    async fn item_exists(&self, canonical_url: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM items WHERE canonical_url = ?")
                .bind(canonical_url)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        let found: Vec<String> = sqlx::query_scalar(
            "SELECT canonical_url FROM items WHERE canonical_url IN (SELECT value FROM json_each(?))",
        )
        .bind(serde_json::to_string(urls)?)
        .fetch_all(&self.pool)
        .await?;
        Ok(found.into_iter().collect())
    }

    async fn insert_item(&self, item: &Item) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (canonical_url, item_id, source_id, title, owner_name,
                               transcript, summary, highlight, publish_date, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(canonical_url) DO NOTHING
            "#,
        )
        .bind(&item.canonical_url)
        .bind(&item.id)
        .bind(&item.source_id)
        .bind(&item.title)
        .bind(&item.owner_name)
        .bind(&item.transcript)
        .bind(&item.summary)
        .bind(&item.highlight)
        .bind(item.publish_date.map(|d| d.timestamp()))
        .bind(item.ingested_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_items_for_source(&self, source_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn newest_publish_date_for_source(
        &self,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let newest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(publish_date) FROM items WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(from_ts(newest))
    }

    async fn items_missing_summary(&self, limit: usize) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT canonical_url, item_id, source_id, title, owner_name, transcript,
                   summary, highlight, publish_date, ingested_at
            FROM items
            WHERE summary IS NULL
            ORDER BY ingested_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(item_from_row).collect())
    }

    async fn set_item_summary(&self, canonical_url: &str, summary: &ItemSummary) -> Result<()> {
        sqlx::query("UPDATE items SET summary = ?, highlight = ? WHERE canonical_url = ?")
            .bind(&summary.summary)
            .bind(&summary.highlight)
            .bind(canonical_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_skip(&self, item_id: &str) -> Result<Option<SkipRecord>> {
        let row = sqlx::query(
            "SELECT item_id, canonical_url, source_id, title, reason FROM skipped_items WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(skip_from_row))
    }

    async fn record_skip(&self, record: &SkipRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO skipped_items (item_id, canonical_url, source_id, title, reason, skipped_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                canonical_url = excluded.canonical_url,
                source_id = excluded.source_id,
                title = excluded.title,
                reason = excluded.reason,
                skipped_at = excluded.skipped_at
            "#,
        )
        .bind(&record.item_id)
        .bind(&record.canonical_url)
        .bind(&record.source_id)
        .bind(&record.title)
        .bind(record.reason.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn skipped_ids(
        &self,
        source_id: Option<&str>,
        item_ids: &[String],
    ) -> Result<HashSet<String>> {
        if item_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let ids_json = serde_json::to_string(item_ids)?;
        let found: Vec<String> = match source_id {
            Some(source_id) => {
                sqlx::query_scalar(
                    "SELECT item_id FROM skipped_items WHERE source_id = ? AND item_id IN (SELECT value FROM json_each(?))",
                )
                .bind(source_id)
                .bind(ids_json)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT item_id FROM skipped_items WHERE item_id IN (SELECT value FROM json_each(?))",
                )
                .bind(ids_json)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(found.into_iter().collect())
    }

    async fn clear_skips(&self, source_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM skipped_items WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_source(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE source_id = ?",
            SOURCE_COLUMNS
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(source_from_row))
    }

    async fn find_source_by_url(&self, source_url: &str) -> Result<Option<SourceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE source_url = ? ORDER BY source_id LIMIT 1",
            SOURCE_COLUMNS
        ))
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(source_from_row))
    }

    async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sources ORDER BY source_id",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(source_from_row).collect())
    }

    async fn bind_source_url(
        &self,
        source_id: &str,
        source_url: &str,
        fetched_total: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (source_id, source_url, total_known_items, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                source_url = COALESCE(sources.source_url, excluded.source_url),
                total_known_items = MAX(sources.total_known_items, excluded.total_known_items),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(source_url)
        .bind(fetched_total)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_scan(&self, source_id: &str, observation: &SourceObservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (source_id, total_known_items, newest_known_publish_date,
                                 last_scanned_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                total_known_items = excluded.total_known_items,
                newest_known_publish_date = COALESCE(excluded.newest_known_publish_date,
                                                     sources.newest_known_publish_date),
                last_scanned_at = excluded.last_scanned_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(observation.total_items)
        .bind(observation.newest_publish_date.map(|d| d.timestamp()))
        .bind(observation.scanned_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
