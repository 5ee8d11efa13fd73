use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Ingested items; canonical_url is the single dedup key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            canonical_url TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            owner_name TEXT,
            transcript TEXT NOT NULL,
            summary TEXT,
            highlight TEXT,
            publish_date INTEGER,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Skip ledger: at most one reason per item
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS skipped_items (
            item_id TEXT PRIMARY KEY,
            canonical_url TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            reason TEXT NOT NULL,
            skipped_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Source registry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            source_id TEXT PRIMARY KEY,
            source_url TEXT,
            total_known_items INTEGER NOT NULL DEFAULT 0,
            newest_known_publish_date INTEGER,
            last_scanned_at INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Log sink
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            details_json TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_source_id ON items(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_item_id ON items(item_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_missing_summary ON items(ingested_at) WHERE summary IS NULL",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_skipped_source_id ON skipped_items(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_url ON sources(source_url)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
