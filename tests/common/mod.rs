//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transcript_sync::config::Config;
use transcript_sync::models::{Item, ItemMetadata, ItemRef, ItemSummary};
use transcript_sync::traits::{
    Collaborators, EventSink, MetadataFetcher, SourceLister, Summarizer, TranscriptFetcher,
};

pub const TRANSCRIPT: &str = "This is a perfectly good transcript with enough words in it.";

/// What the fake transcript service answers for one item.
#[derive(Debug, Clone)]
pub enum Transcript {
    Text(String),
    Missing,
    Error(String),
    /// Answers with [`TRANSCRIPT`] after the given delay.
    Slow(Duration),
}

#[derive(Default)]
struct WorldState {
    listings: HashMap<String, Vec<ItemRef>>,
    listing_errors: HashMap<String, String>,
    metadata: HashMap<String, ItemMetadata>,
    transcripts: HashMap<String, Transcript>,
    transcript_calls: HashMap<String, usize>,
}

/// A fake upstream: sources, their items, and each item's transcript.
#[derive(Default)]
pub struct FakeWorld {
    state: Mutex<WorldState>,
}

pub fn item_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends an item to the end of a source listing (listings are newest first).
    pub fn add_item(&self, source_url: &str, id: &str, transcript: Transcript) -> ItemRef {
        self.add_dated_item(source_url, id, transcript, None)
    }

    pub fn add_dated_item(
        &self,
        source_url: &str,
        id: &str,
        transcript: Transcript,
        publish_date: Option<DateTime<Utc>>,
    ) -> ItemRef {
        let item = ItemRef {
            id: id.to_string(),
            title: format!("Video {}", id),
            url: item_url(id),
        };
        let mut state = self.state.lock().unwrap();
        state
            .listings
            .entry(source_url.to_string())
            .or_default()
            .push(item.clone());
        state.metadata.insert(
            item.url.clone(),
            ItemMetadata {
                title: item.title.clone(),
                owner_name: "Fake Channel".to_string(),
                publish_date,
            },
        );
        state.transcripts.insert(item.url.clone(), transcript);
        item
    }

    pub fn set_transcript(&self, url: &str, transcript: Transcript) {
        self.state
            .lock()
            .unwrap()
            .transcripts
            .insert(url.to_string(), transcript);
    }

    pub fn fail_listing(&self, source_url: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .listing_errors
            .insert(source_url.to_string(), message.to_string());
    }

    pub fn transcript_calls(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .transcript_calls
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SourceLister for FakeWorld {
    async fn list_source_items(&self, source_url: &str, max_items: usize) -> Result<Vec<ItemRef>> {
        let state = self.state.lock().unwrap();
        if let Some(message) = state.listing_errors.get(source_url) {
            bail!("{}", message);
        }
        let mut items = state.listings.get(source_url).cloned().unwrap_or_default();
        items.truncate(max_items);
        Ok(items)
    }
}

#[async_trait]
impl MetadataFetcher for FakeWorld {
    async fn fetch_item_metadata(&self, url: &str) -> Result<ItemMetadata> {
        let state = self.state.lock().unwrap();
        state
            .metadata
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no metadata for {}", url))
    }
}

#[async_trait]
impl TranscriptFetcher for FakeWorld {
    async fn fetch_transcript(&self, url: &str) -> Result<Option<String>> {
        let answer = {
            let mut state = self.state.lock().unwrap();
            *state.transcript_calls.entry(url.to_string()).or_default() += 1;
            state.transcripts.get(url).cloned()
        };
        match answer {
            Some(Transcript::Text(text)) => Ok(Some(text)),
            Some(Transcript::Missing) | None => Ok(None),
            Some(Transcript::Error(message)) => Err(anyhow!("{}", message)),
            Some(Transcript::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Some(TRANSCRIPT.to_string()))
            }
        }
    }
}

pub struct FakeSummarizer;

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(
        &self,
        title: &str,
        _owner_name: &str,
        _transcript_excerpt: &str,
    ) -> Result<ItemSummary> {
        Ok(ItemSummary {
            summary: format!("Summary of {}", title),
            highlight: "Highlight.".to_string(),
        })
    }
}

/// Panics on its first call and summarizes normally afterwards.
#[derive(Default)]
pub struct PanicOnceSummarizer {
    panicked: AtomicBool,
}

#[async_trait]
impl Summarizer for PanicOnceSummarizer {
    async fn summarize(
        &self,
        title: &str,
        owner_name: &str,
        transcript_excerpt: &str,
    ) -> Result<ItemSummary> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("summarizer blew up");
        }
        FakeSummarizer
            .summarize(title, owner_name, transcript_excerpt)
            .await
    }
}

/// Keeps every event kind it receives.
#[derive(Default)]
pub struct RecordingEvents {
    kinds: Mutex<Vec<String>>,
}

impl RecordingEvents {
    pub fn kinds(&self) -> Vec<String> {
        self.kinds.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn log_event(&self, kind: &str, _message: &str, _details: Option<Value>) {
        self.kinds.lock().unwrap().push(kind.to_string());
    }
}

pub fn collaborators(
    world: &Arc<FakeWorld>,
    summarize: bool,
    events: &Arc<RecordingEvents>,
) -> Collaborators {
    let summarizer: Option<Arc<dyn Summarizer>> = if summarize {
        Some(Arc::new(FakeSummarizer))
    } else {
        None
    };
    Collaborators {
        lister: world.clone(),
        metadata: world.clone(),
        transcripts: world.clone(),
        summarizer,
        events: events.clone(),
    }
}

/// Config with no pacing and a short minimum transcript length.
pub fn test_config(extra: &str) -> Config {
    let content = format!(
        r#"
[db]
path = "/nonexistent/tsync.sqlite"

[pipeline]
item_delay_ms = 0
min_transcript_chars = 20
call_timeout_secs = 5
listing_timeout_secs = 5

{}
"#,
        extra
    );
    toml::from_str(&content).unwrap()
}

pub fn stored_item(id: &str, source_id: &str) -> Item {
    Item {
        id: id.to_string(),
        source_id: source_id.to_string(),
        canonical_url: item_url(id),
        title: format!("Video {}", id),
        owner_name: Some("Fake Channel".to_string()),
        transcript: TRANSCRIPT.to_string(),
        summary: None,
        highlight: None,
        publish_date: None,
        ingested_at: Utc::now(),
    }
}
