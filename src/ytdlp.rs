//! `yt-dlp`-backed source listing and metadata lookup.
//!
//! Both operations shell out to `yt-dlp -J` and parse its JSON dump:
//!
//! - listing uses `--flat-playlist --playlist-end N`, which returns one
//!   lightweight entry per item without per-item requests;
//! - metadata uses `--skip-download` on a single item URL.
//!
//! Processes are spawned with `kill_on_drop`, so when a caller's timeout
//! drops the future the child is killed instead of lingering.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tokio::process::Command;

use crate::config::YtDlpConfig;
use crate::models::{ItemMetadata, ItemRef};
use crate::traits::{MetadataFetcher, SourceLister};

pub struct YtDlp {
    config: YtDlpConfig,
}

impl YtDlp {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    async fn dump_json(&self, args: &[String], url: &str) -> Result<Value> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("-J")
            .arg("--no-warnings")
            .args(args)
            .args(&self.config.extra_args)
            .arg(url)
            .kill_on_drop(true);

        let output = cmd.output().await.with_context(|| {
            format!(
                "Failed to execute '{}'. Is yt-dlp installed?",
                self.config.binary.display()
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp failed for {}: {}", url, stderr.trim());
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("yt-dlp returned invalid JSON for {}", url))
    }
}

#[async_trait]
impl SourceLister for YtDlp {
    async fn list_source_items(&self, source_url: &str, max_items: usize) -> Result<Vec<ItemRef>> {
        let args = vec![
            "--flat-playlist".to_string(),
            "--playlist-end".to_string(),
            max_items.to_string(),
        ];
        let dump = self.dump_json(&args, source_url).await?;
        let mut items = parse_listing(&dump);
        items.truncate(max_items);
        tracing::debug!(source_url, count = items.len(), "listed source items");
        Ok(items)
    }
}

#[async_trait]
impl MetadataFetcher for YtDlp {
    async fn fetch_item_metadata(&self, url: &str) -> Result<ItemMetadata> {
        let dump = self.dump_json(&["--skip-download".to_string()], url).await?;
        parse_metadata(&dump)
    }
}

/// Flattens a `--flat-playlist` dump into item refs.
///
/// Channel pages nest their tabs (videos, shorts, live) as sub-playlists,
/// so nested `entries` are walked depth-first.
pub fn parse_listing(dump: &Value) -> Vec<ItemRef> {
    let mut items = Vec::new();
    collect_entries(dump, &mut items);
    items
}

fn collect_entries(node: &Value, out: &mut Vec<ItemRef>) {
    let Some(entries) = node.get("entries").and_then(|e| e.as_array()) else {
        return;
    };
    for entry in entries {
        if entry.get("entries").is_some() {
            collect_entries(entry, out);
            continue;
        }
        if let Some(item) = entry_to_item(entry) {
            out.push(item);
        }
    }
}

fn entry_to_item(entry: &Value) -> Option<ItemRef> {
    let id = entry.get("id").and_then(|v| v.as_str())?.to_string();
    let title = entry
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("Untitled")
        .to_string();
    let url = canonical_url(entry, &id)?;
    Some(ItemRef { id, title, url })
}

/// Picks the canonical URL of an entry.
///
/// YouTube entries are normalized to `watch?v=` form so that the same
/// video listed via a channel, a playlist, or a direct link dedups to one
/// key. Other extractors keep the URL they report.
pub fn canonical_url(entry: &Value, id: &str) -> Option<String> {
    let extractor = entry
        .get("ie_key")
        .or_else(|| entry.get("extractor_key"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if extractor.eq_ignore_ascii_case("youtube") {
        return Some(format!("https://www.youtube.com/watch?v={}", id));
    }

    entry
        .get("webpage_url")
        .or_else(|| entry.get("url"))
        .and_then(|v| v.as_str())
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .map(str::to_string)
}

/// Builds an item ref for a single user-supplied item URL.
///
/// YouTube links (`watch?v=`, `youtu.be/`, `/shorts/`, `/live/`) are
/// normalized to the same canonical form listings produce. Any other
/// http(s) URL is its own ID.
pub fn item_ref_from_url(raw: &str) -> Result<ItemRef> {
    let url = url::Url::parse(raw.trim()).with_context(|| format!("Invalid item URL: {}", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Unsupported URL scheme: {}", url.scheme());
    }

    let host = url.host_str().unwrap_or("").trim_start_matches("www.").trim_start_matches("m.");
    let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());

    let youtube_id = match host {
        "youtube.com" | "music.youtube.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("shorts") | Some("live") | Some("embed") => segments.next().map(str::to_string),
            _ => None,
        },
        "youtu.be" => segments.next().map(str::to_string),
        _ => None,
    };

    Ok(match youtube_id.filter(|id| !id.is_empty()) {
        Some(id) => ItemRef {
            url: format!("https://www.youtube.com/watch?v={}", id),
            title: String::new(),
            id,
        },
        None => ItemRef {
            id: url.to_string(),
            title: String::new(),
            url: url.to_string(),
        },
    })
}

pub fn parse_metadata(dump: &Value) -> Result<ItemMetadata> {
    let title = dump
        .get("title")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("yt-dlp metadata has no title"))?
        .to_string();

    let owner_name = ["channel", "uploader", "creator"]
        .iter()
        .find_map(|key| dump.get(*key).and_then(|v| v.as_str()))
        .unwrap_or("unknown")
        .to_string();

    Ok(ItemMetadata {
        title,
        owner_name,
        publish_date: parse_publish_date(dump),
    })
}

/// Prefers the precise `timestamp`, falling back to the day-granular
/// `upload_date` (`YYYYMMDD`).
fn parse_publish_date(dump: &Value) -> Option<DateTime<Utc>> {
    if let Some(ts) = dump.get("timestamp").and_then(|v| v.as_i64()) {
        return DateTime::from_timestamp(ts, 0);
    }
    let raw = dump.get("upload_date").and_then(|v| v.as_str())?;
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}
