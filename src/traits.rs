//! Collaborator traits.
//!
//! The engine treats listing, metadata lookup, transcript retrieval,
//! summarization, and event logging as opaque external operations. Each
//! one is a trait here so that production implementations (`yt-dlp`,
//! an operator-supplied transcript command, an HTTP summarizer) and test
//! fakes plug into the same pipeline.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Collaborators                     │
//! │  ┌──────────┐ ┌──────────┐ ┌────────────┐ ┌───────┐  │
//! │  │ Lister   │ │ Metadata │ │ Transcript │ │Summary│  │
//! │  │ (yt-dlp) │ │ (yt-dlp) │ │ (command)  │ │(HTTP) │  │
//! │  └──────────┘ └──────────┘ └────────────┘ └───────┘  │
//! └──────────────┬───────────────────────────────────────┘
//!                ▼
//!     ItemPipeline / BatchOrchestrator / Sweep
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{ItemMetadata, ItemRef, ItemSummary};

/// Lists the items published by a source, newest first.
#[async_trait]
pub trait SourceLister: Send + Sync {
    /// Flat listing of at most `max_items` entries.
    async fn list_source_items(&self, source_url: &str, max_items: usize) -> Result<Vec<ItemRef>>;
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch_item_metadata(&self, url: &str) -> Result<ItemMetadata>;
}

/// Retrieves the transcript of one item.
///
/// `Ok(None)` means the item has no transcript; that is a durable skip.
/// `Err` is a transient failure and must not be treated as a skip.
#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    async fn fetch_transcript(&self, url: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        title: &str,
        owner_name: &str,
        transcript_excerpt: &str,
    ) -> Result<ItemSummary>;
}

/// Fire-and-forget observability sink.
///
/// Implementations swallow their own failures; callers never wait on or
/// react to the outcome of logging.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn log_event(&self, kind: &str, message: &str, details: Option<Value>);
}

/// The full set of external collaborators one engine instance uses.
#[derive(Clone)]
pub struct Collaborators {
    pub lister: Arc<dyn SourceLister>,
    pub metadata: Arc<dyn MetadataFetcher>,
    pub transcripts: Arc<dyn TranscriptFetcher>,
    /// `None` when summarization is disabled; items are then stored
    /// without a summary and left for later enrichment.
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    /// Builds the production collaborators described by the config.
    ///
    /// `events` is passed in because the durable sink needs the database
    /// pool owned by the caller.
    pub fn from_config(config: &Config, events: Arc<dyn EventSink>) -> Result<Self> {
        use crate::summarize::create_summarizer;
        use crate::transcript::CommandTranscriptFetcher;
        use crate::ytdlp::YtDlp;

        let ytdlp = Arc::new(YtDlp::new(config.ytdlp.clone()));

        Ok(Self {
            lister: ytdlp.clone(),
            metadata: ytdlp,
            transcripts: Arc::new(CommandTranscriptFetcher::new(config.transcript.clone())?),
            summarizer: create_summarizer(&config.summarizer)?,
            events,
        })
    }
}
