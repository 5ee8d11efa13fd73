//! Event sinks for the `logEvent` collaborator.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::traits::EventSink;

/// Emits events as tracing records only.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn log_event(&self, kind: &str, message: &str, details: Option<Value>) {
        match details {
            Some(details) => tracing::info!(target: "events", kind, %details, "{}", message),
            None => tracing::info!(target: "events", kind, "{}", message),
        }
    }
}

/// Persists events to the `events` table (and traces them).
pub struct SqliteEventSink {
    pool: SqlitePool,
}

impl SqliteEventSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for SqliteEventSink {
    async fn log_event(&self, kind: &str, message: &str, details: Option<Value>) {
        TracingEventSink
            .log_event(kind, message, details.clone())
            .await;

        let result = sqlx::query(
            "INSERT INTO events (kind, message, details_json, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(message)
        .bind(details.map(|d| d.to_string()))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, kind, "failed to persist event");
        }
    }
}
