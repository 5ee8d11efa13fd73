//! Core data models.
//!
//! These types flow between the collaborators (listing, metadata,
//! transcript, summary), the pipeline, and the durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One candidate item as produced by a source listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    /// Stable external identifier (e.g. a video ID).
    pub id: String,
    pub title: String,
    /// Canonical URL; the dedup key for ingested items.
    pub url: String,
}

/// Per-item metadata returned by the metadata collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMetadata {
    pub title: String,
    pub owner_name: String,
    pub publish_date: Option<DateTime<Utc>>,
}

/// Output of the summarization collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSummary {
    pub summary: String,
    pub highlight: String,
}

/// An ingested item.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: String,
    pub source_id: String,
    pub canonical_url: String,
    pub title: String,
    pub owner_name: Option<String>,
    #[serde(skip_serializing)]
    pub transcript: String,
    pub summary: Option<String>,
    pub highlight: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
}

/// Why an item was deliberately not ingested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SkipReason {
    NoTranscript,
    AlreadyProcessed,
    /// Any other pipeline-defined code.
    Other(String),
}

impl SkipReason {
    pub fn as_str(&self) -> &str {
        match self {
            SkipReason::NoTranscript => "no_transcript",
            SkipReason::AlreadyProcessed => "already_processed",
            SkipReason::Other(code) => code,
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "no_transcript" => SkipReason::NoTranscript,
            "already_processed" => SkipReason::AlreadyProcessed,
            other => SkipReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SkipReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A durable "do not retry" entry in the skip ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    pub item_id: String,
    pub canonical_url: String,
    pub source_id: String,
    pub title: String,
    pub reason: SkipReason,
}

/// Aggregate knowledge about one source (channel or playlist).
///
/// `total_known_items` and `newest_known_publish_date` are only written
/// from observed scans, never estimated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub source_url: Option<String>,
    pub total_known_items: i64,
    pub newest_known_publish_date: Option<DateTime<Utc>>,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

impl SourceRecord {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_url: None,
            total_known_items: 0,
            newest_known_publish_date: None,
            last_scanned_at: None,
        }
    }
}

/// Result of running one item through the pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { item: Box<Item> },
    Skipped { reason: SkipReason },
    Failed { message: String },
}

impl Outcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Outcome::Skipped { reason }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Outcome::Failed {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}
