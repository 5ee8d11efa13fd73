use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tsync");
    path
}

/// Fake `yt-dlp`: a two-item flat listing, or one item's metadata.
const FAKE_YTDLP: &str = r#"#!/bin/sh
for arg in "$@"; do
  if [ "$arg" = "--flat-playlist" ]; then
    echo '{"entries":[{"id":"aaa","title":"First","ie_key":"Youtube"},{"id":"bbb","title":"Second","ie_key":"Youtube"}]}'
    exit 0
  fi
done
echo '{"title":"A video","channel":"Script Channel","upload_date":"20240101"}'
"#;

/// Fake transcript command: `bbb` has no transcript.
const FAKE_TRANSCRIPT: &str = r#"#!/bin/sh
case "$1" in
  *bbb*) exit 0 ;;
  *) echo "A long enough transcript for the pipeline to accept it as real text." ;;
esac
"#;

const CHANNEL: &str = "https://www.youtube.com/@scriptchan";

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let bin_dir = root.join("bin");
    fs::create_dir_all(&bin_dir).unwrap();

    let ytdlp = bin_dir.join("yt-dlp");
    write_script(&ytdlp, FAKE_YTDLP);
    let transcript = bin_dir.join("fetch-transcript");
    write_script(&transcript, FAKE_TRANSCRIPT);

    let config_content = format!(
        r#"[db]
path = "{root}/data/tsync.sqlite"

[server]
bind = "127.0.0.1:7341"

[pipeline]
item_delay_ms = 0
min_transcript_chars = 20

[ytdlp]
binary = "{ytdlp}"

[transcript]
command = ["{transcript}"]
"#,
        root = root.display(),
        ytdlp = ytdlp.display(),
        transcript = transcript.display(),
    );

    let config_path = config_dir.join("tsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tsync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/tsync.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_tsync(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tsync(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        format!(
            "[db]\npath = \"{}/x.sqlite\"\n[jobs]\nresult_limit = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_tsync(&bad, &["init"]);
    assert!(!success);
    assert!(stderr.contains("result_limit"), "stderr: {}", stderr);
}

#[test]
fn test_empty_database_views() {
    let (_tmp, config_path) = setup_test_env();
    run_tsync(&config_path, &["init"]);

    let (stdout, stderr, success) = run_tsync(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Items:       0"));

    let (stdout, _, success) = run_tsync(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("No sources"));

    let (_, stderr, success) = run_tsync(&config_path, &["check", "@nobody"]);
    assert!(!success);
    assert!(stderr.contains("Unknown source"), "stderr: {}", stderr);
}

#[test]
fn test_completions_need_no_config() {
    let (stdout, _, success) = run_tsync(Path::new("/nonexistent/tsync.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("tsync"));
}

#[cfg(unix)]
#[test]
fn test_ingest_source_end_to_end() {
    let (_tmp, config_path) = setup_test_env();
    run_tsync(&config_path, &["init"]);

    let (stdout, stderr, success) = run_tsync(&config_path, &["ingest-source", CHANNEL, "--max-items", "10"]);
    assert!(success, "ingest-source failed: {}", stderr);
    let job: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(job["status"], "completed");
    assert_eq!(job["total"], 2);
    assert_eq!(job["processed"], 1);
    assert_eq!(job["skipped"], 1);

    // Everything is known or skipped now
    let (stdout, _, _) = run_tsync(&config_path, &["ingest-source", CHANNEL]);
    let job: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(job["total"], 0);

    let (stdout, _, success) = run_tsync(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("@scriptchan"));
    assert!(stdout.contains(CHANNEL));

    let (stdout, _, success) = run_tsync(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Items:       1"));
    assert!(stdout.contains("no_transcript"));

    let (stdout, stderr, success) = run_tsync(&config_path, &["check", "@scriptchan"]);
    assert!(success, "check failed: {}", stderr);
    let decision: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(decision["liveTotal"], 2);
    assert_eq!(decision["ingestedCount"], 1);
    assert_eq!(decision["reason"], "count_gap");

    let (stdout, _, success) = run_tsync(&config_path, &["retry-skips", "@scriptchan"]);
    assert!(success);
    assert!(stdout.contains("Cleared 1 skip records"));
}

#[cfg(unix)]
#[test]
fn test_ingest_item_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_tsync(&config_path, &["init"]);

    let url = "https://www.youtube.com/watch?v=aaa";
    let (stdout, stderr, success) = run_tsync(&config_path, &["ingest-item", url]);
    assert!(success, "ingest-item failed: {}", stderr);
    let outcome: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["item"]["source_id"], "Script Channel");

    let (stdout, _, _) = run_tsync(&config_path, &["ingest-item", url]);
    let outcome: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["status"], "skipped");
    assert_eq!(outcome["reason"], "already_processed");
}
