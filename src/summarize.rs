//! Summarization provider.
//!
//! - `disabled`: no summarizer; items are stored without a summary and
//!   picked up later by the sweep's enrichment pass.
//! - `openai`: any OpenAI-compatible `/chat/completions` endpoint.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - other 4xx → fail immediately
//! - network errors → retry

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SummarizerConfig;
use crate::models::ItemSummary;
use crate::traits::Summarizer;

pub fn create_summarizer(config: &SummarizerConfig) -> Result<Option<Arc<dyn Summarizer>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => {
            let summarizer: Arc<dyn Summarizer> = Arc::new(OpenAISummarizer::new(config)?);
            Ok(Some(summarizer))
        }
        other => bail!("Unknown summarizer provider: {}", other),
    }
}

pub struct OpenAISummarizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAISummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("summarizer.model required for openai provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Summarizer for OpenAISummarizer {
    async fn summarize(
        &self,
        title: &str,
        owner_name: &str,
        transcript_excerpt: &str,
    ) -> Result<ItemSummary> {
        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": "Summarize the transcript. Reply with a JSON object with keys \"summary\" and \"highlight\"."
                },
                {
                    "role": "user",
                    "content": format!("Title: {}\nBy: {}\n\nTranscript:\n{}", title, owner_name, transcript_excerpt)
                }
            ]
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "summarizer request failed, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "summarizer API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("summarizer API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("summarization failed after retries")))
    }
}

/// Extracts `{summary, highlight}` from a chat completion.
///
/// Models occasionally ignore the JSON instruction; plain text is then
/// used as the summary and its first sentence as the highlight.
pub fn parse_completion(json: &Value) -> Result<ItemSummary> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))?
        .trim();

    if content.is_empty() {
        bail!("summarizer returned an empty completion");
    }

    if let Ok(parsed) = serde_json::from_str::<Value>(content) {
        if let Some(summary) = parsed.get("summary").and_then(|s| s.as_str()) {
            let highlight = parsed
                .get("highlight")
                .and_then(|h| h.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| first_sentence(summary));
            return Ok(ItemSummary {
                summary: summary.to_string(),
                highlight,
            });
        }
    }

    Ok(ItemSummary {
        summary: content.to_string(),
        highlight: first_sentence(content),
    })
}

fn first_sentence(text: &str) -> String {
    let end = text
        .find(['.', '!', '?'])
        .map(|i| i + 1)
        .unwrap_or(text.len());
    text[..end].trim().to_string()
}
