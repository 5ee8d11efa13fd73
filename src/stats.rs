//! Database statistics.
//!
//! Summarizes what is stored: ingested items, summary coverage, the skip
//! ledger broken down by reason, and per-source progress. Used by
//! `tsync stats`.
//!
//! It also counts skip records whose canonical URL is *also* present in
//! the item store. That happens when the same real-world item was
//! ingested under a different stable ID than the one that was skipped.
//! Neither record is removed; the count is only reported.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source_id: String,
    pub item_count: i64,
    pub skip_count: i64,
    pub total_known_items: Option<i64>,
    pub last_scanned_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub items: i64,
    pub summarized: i64,
    pub skips: i64,
    pub skips_by_reason: Vec<(String, i64)>,
    /// Skip records whose canonical URL is also ingested.
    pub skipped_but_ingested: i64,
    pub sources: Vec<SourceStats>,
    pub events: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(pool)
        .await?;

    let summarized: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE summary IS NOT NULL")
        .fetch_one(pool)
        .await?;

    let skips: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skipped_items")
        .fetch_one(pool)
        .await?;

    let skips_by_reason = sqlx::query(
        "SELECT reason, COUNT(*) AS n FROM skipped_items GROUP BY reason ORDER BY n DESC, reason",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get::<String, _>("reason"), row.get::<i64, _>("n")))
    .collect();

    let skipped_but_ingested: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM skipped_items s JOIN items i ON i.canonical_url = s.canonical_url",
    )
    .fetch_one(pool)
    .await?;

    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(pool)
        .await?;

    // Every source that has items, skips, or a registry record
    let source_rows = sqlx::query(
        r#"
        WITH ids AS (
            SELECT source_id FROM items
            UNION SELECT source_id FROM skipped_items
            UNION SELECT source_id FROM sources
        )
        SELECT
            ids.source_id AS source_id,
            (SELECT COUNT(*) FROM items i WHERE i.source_id = ids.source_id) AS item_count,
            (SELECT COUNT(*) FROM skipped_items k WHERE k.source_id = ids.source_id) AS skip_count,
            s.total_known_items AS total_known_items,
            s.last_scanned_at AS last_scanned_at
        FROM ids
        LEFT JOIN sources s ON s.source_id = ids.source_id
        ORDER BY item_count DESC, ids.source_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let sources = source_rows
        .iter()
        .map(|row| SourceStats {
            source_id: row.get("source_id"),
            item_count: row.get("item_count"),
            skip_count: row.get("skip_count"),
            total_known_items: row.get("total_known_items"),
            last_scanned_at: row.get("last_scanned_at"),
        })
        .collect();

    Ok(Stats {
        items,
        summarized,
        skips,
        skips_by_reason,
        skipped_but_ingested,
        sources,
        events,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    println!("transcript-sync stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!();
    println!("  Items:       {}", stats.items);
    println!(
        "  Summarized:  {} / {} ({}%)",
        stats.summarized,
        stats.items,
        if stats.items > 0 {
            (stats.summarized * 100) / stats.items
        } else {
            0
        }
    );
    println!("  Skipped:     {}", stats.skips);
    for (reason, n) in &stats.skips_by_reason {
        println!("    {:<20} {}", reason, n);
    }
    if stats.skipped_but_ingested > 0 {
        println!(
            "  Skipped but ingested under another ID: {}",
            stats.skipped_but_ingested
        );
    }
    println!("  Events:      {}", stats.events);

    if !stats.sources.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<28} {:>6} {:>6} {:>6}   {}",
            "SOURCE", "ITEMS", "SKIPS", "KNOWN", "LAST SCAN"
        );
        println!("  {}", "-".repeat(76));

        for s in &stats.sources {
            let known = s
                .total_known_items
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string());
            let scan_display = match s.last_scanned_at {
                Some(ts) => format_scan_age(ts, Utc::now()),
                None => "never".to_string(),
            };
            println!(
                "  {:<28} {:>6} {:>6} {:>6}   {}",
                s.source_id, s.item_count, s.skip_count, known, scan_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Age of a scan timestamp, coarse-grained: "just now", "5m ago",
/// "3h ago", "2d ago", or the date once older than a month.
fn format_scan_age(ts: i64, now: DateTime<Utc>) -> String {
    let Some(scanned) = DateTime::from_timestamp(ts, 0) else {
        return ts.to_string();
    };
    let age = now.signed_duration_since(scanned);

    match age {
        a if a < Duration::zero() || a >= Duration::days(30) => {
            scanned.format("%Y-%m-%d").to_string()
        }
        a if a < Duration::minutes(1) => "just now".to_string(),
        a if a < Duration::hours(1) => format!("{}m ago", a.num_minutes()),
        a if a < Duration::days(1) => format!("{}h ago", a.num_hours()),
        a => format!("{}d ago", a.num_days()),
    }
}
