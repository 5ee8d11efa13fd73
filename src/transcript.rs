//! Command-backed transcript retrieval.
//!
//! The operator configures an argv (`[transcript].command`); the item URL
//! is appended and the command's stdout is the transcript. How the command
//! obtains it (captions, speech-to-text, a cache) is its own business.
//!
//! Exit status contract:
//!
//! | Exit | stdout | Meaning |
//! |------|--------|---------|
//! | 0 | text | transcript |
//! | 0 | empty | no transcript (durable skip) |
//! | non-zero | – | transient failure (retried on a later run) |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::TranscriptConfig;
use crate::traits::TranscriptFetcher;

pub struct CommandTranscriptFetcher {
    program: String,
    args: Vec<String>,
}

impl CommandTranscriptFetcher {
    pub fn new(config: TranscriptConfig) -> Result<Self> {
        let mut argv = config.command.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| anyhow::anyhow!("transcript.command must not be empty"))?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }
}

#[async_trait]
impl TranscriptFetcher for CommandTranscriptFetcher {
    async fn fetch_transcript(&self, url: &str) -> Result<Option<String>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute transcript command '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "transcript command exited with {} for {}: {}",
                output.status,
                url,
                stderr.trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn fetcher(script: &str) -> CommandTranscriptFetcher {
        CommandTranscriptFetcher::new(TranscriptConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn stdout_is_the_transcript() {
        let f = fetcher("echo \"transcript for $1\"");
        let text = f.fetch_transcript("https://example.com/v/1").await.unwrap();
        assert_eq!(text.as_deref(), Some("transcript for https://example.com/v/1"));
    }

    #[tokio::test]
    async fn empty_stdout_means_no_transcript() {
        let f = fetcher("true");
        assert_eq!(f.fetch_transcript("u").await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let f = fetcher("echo boom >&2; exit 3");
        let err = f.fetch_transcript("u").await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
