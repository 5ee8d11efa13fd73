//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal config only
//! needs a database path. See `config/tsync.example.toml` for all keys.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub ytdlp: YtDlpConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Name of the environment variable holding the sweep bearer token.
    #[serde(default = "default_sweep_token_env")]
    pub sweep_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            sweep_token_env: default_sweep_token_env(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}
fn default_sweep_token_env() -> String {
    "TSYNC_SWEEP_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Transcripts shorter than this (in characters) count as missing.
    #[serde(default = "default_min_transcript_chars")]
    pub min_transcript_chars: usize,
    /// Fixed pause between items of one job. This is the rate limiter.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_listing_timeout_secs")]
    pub listing_timeout_secs: u64,
    /// Only this much of the transcript is handed to the summarizer.
    #[serde(default = "default_transcript_excerpt_chars")]
    pub transcript_excerpt_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_transcript_chars: default_min_transcript_chars(),
            item_delay_ms: default_item_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            listing_timeout_secs: default_listing_timeout_secs(),
            transcript_excerpt_chars: default_transcript_excerpt_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }
}

fn default_min_transcript_chars() -> usize {
    200
}
fn default_item_delay_ms() -> u64 {
    1000
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_listing_timeout_secs() -> u64 {
    300
}
fn default_transcript_excerpt_chars() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// How many per-item results a job keeps (most recent wins).
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    /// How long a finished job stays pollable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Upper bound on retained jobs; oldest finished jobs are evicted first.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            result_limit: default_result_limit(),
            retention_secs: default_retention_secs(),
            capacity: default_capacity(),
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

fn default_result_limit() -> usize {
    10
}
fn default_retention_secs() -> u64 {
    3600
}
fn default_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How many of the newest items are listed per source during a sweep.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    #[serde(default = "default_max_items_per_source")]
    pub max_items_per_source: usize,
    /// Stored items lacking a summary that one sweep may enrich.
    #[serde(default = "default_enrich_limit")]
    pub enrich_limit: usize,
    /// Cap on the bulk listing the sync checker uses to count live items.
    #[serde(default = "default_sync_listing_cap")]
    pub sync_listing_cap: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
            recent_window: default_recent_window(),
            max_items_per_source: default_max_items_per_source(),
            enrich_limit: default_enrich_limit(),
            sync_listing_cap: default_sync_listing_cap(),
        }
    }
}

fn default_interval_secs() -> u64 {
    6 * 60 * 60
}
fn default_recent_window() -> usize {
    30
}
fn default_max_items_per_source() -> usize {
    10
}
fn default_enrich_limit() -> usize {
    20
}
fn default_sync_listing_cap() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct YtDlpConfig {
    #[serde(default = "default_ytdlp_binary")]
    pub binary: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: default_ytdlp_binary(),
            extra_args: Vec::new(),
        }
    }
}

fn default_ytdlp_binary() -> PathBuf {
    PathBuf::from("yt-dlp")
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptConfig {
    /// argv of the transcript command; the item URL is appended.
    #[serde(default = "default_transcript_command")]
    pub command: Vec<String>,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            command: default_transcript_command(),
        }
    }
}

fn default_transcript_command() -> Vec<String> {
    vec!["fetch-transcript".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.jobs.result_limit == 0 {
        anyhow::bail!("jobs.result_limit must be > 0");
    }
    if config.jobs.capacity == 0 {
        anyhow::bail!("jobs.capacity must be > 0");
    }
    if config.sweep.max_items_per_source == 0 {
        anyhow::bail!("sweep.max_items_per_source must be > 0");
    }
    if config.sweep.recent_window == 0 {
        anyhow::bail!("sweep.recent_window must be > 0");
    }
    if config.sweep.enabled && config.sweep.interval_secs == 0 {
        anyhow::bail!("sweep.interval_secs must be > 0 when the sweep is enabled");
    }
    if config.transcript.command.is_empty() {
        anyhow::bail!("transcript.command must not be empty");
    }

    match config.summarizer.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.summarizer.model.is_none() {
                anyhow::bail!("summarizer.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown summarizer provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!("[db]\npath = \"/tmp/tsync.sqlite\"\n{}", extra);
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.jobs.result_limit, 10);
        assert_eq!(config.pipeline.item_delay(), Duration::from_secs(1));
        assert_eq!(config.sweep.max_items_per_source, 10);
        assert_eq!(config.summarizer.provider, "disabled");
        assert_eq!(config.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn rejects_zero_result_limit() {
        let err = parse("[jobs]\nresult_limit = 0\n").unwrap_err();
        assert!(err.to_string().contains("result_limit"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse("[summarizer]\nprovider = \"carrier-pigeon\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown summarizer provider"));
    }

    #[test]
    fn openai_requires_model() {
        assert!(parse("[summarizer]\nprovider = \"openai\"\n").is_err());
        let config = parse("[summarizer]\nprovider = \"openai\"\nmodel = \"gpt-4o-mini\"\n").unwrap();
        assert_eq!(config.summarizer.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn rejects_empty_transcript_command() {
        assert!(parse("[transcript]\ncommand = []\n").is_err());
    }
}
