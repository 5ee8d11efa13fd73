//! HTTP surface tests: the server runs on a free port with in-memory
//! collaborators and is driven with reqwest.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use common::{collaborators, test_config, FakeWorld, RecordingEvents, Transcript, TRANSCRIPT};
use transcript_sync::engine::Engine;
use transcript_sync::server::run_server;
use transcript_sync::store::memory::InMemoryStore;

const CHANNEL: &str = "https://www.youtube.com/@httpchannel";

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct TestServer {
    base: String,
    world: Arc<FakeWorld>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(token_env: &str) -> TestServer {
    let port = find_free_port();
    let world = FakeWorld::new();
    let events = Arc::new(RecordingEvents::default());
    let config = test_config(&format!(
        "[server]\nbind = \"127.0.0.1:{}\"\nsweep_token_env = \"{}\"\n",
        port, token_env
    ));
    let engine = Arc::new(Engine::new(
        config,
        Arc::new(InMemoryStore::new()),
        collaborators(&world, false, &events),
    ));

    let handle = tokio::spawn(async move {
        run_server(engine).await.ok();
    });
    wait_for_server(port).await;

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        world,
        handle,
    }
}

async fn poll_job(client: &reqwest::Client, base: &str, job_id: &str) -> Value {
    for _ in 0..100 {
        let body: Value = client
            .get(format!("{}/jobs/{}", base, job_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let status = body["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "error" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never finished", job_id);
}

#[tokio::test]
async fn test_health() {
    let server = start_server("TSYNC_TEST_HEALTH_TOKEN").await;
    let body: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ingest_item_returns_outcome() {
    let server = start_server("TSYNC_TEST_ITEM_TOKEN").await;
    server
        .world
        .add_item(CHANNEL, "one", Transcript::Text(TRANSCRIPT.into()));
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ingest-item", server.base))
        .json(&json!({ "url": "https://youtu.be/one" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["item"]["id"], "one");
    assert!(body["item"].get("transcript").is_none());

    let body: Value = client
        .post(format!("{}/ingest-item", server.base))
        .json(&json!({ "url": "https://www.youtube.com/watch?v=one" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "skipped");
    assert_eq!(body["reason"], "already_processed");

    let resp = client
        .post(format!("{}/ingest-item", server.base))
        .json(&json!({ "url": "not a url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_ingest_source_job_lifecycle() {
    let server = start_server("TSYNC_TEST_JOB_TOKEN").await;
    server
        .world
        .add_item(CHANNEL, "a", Transcript::Text(TRANSCRIPT.into()));
    server.world.add_item(CHANNEL, "b", Transcript::Missing);
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ingest-source", server.base))
        .json(&json!({ "sourceUrl": CHANNEL, "maxItems": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let job = poll_job(&client, &server.base, &job_id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["total"], 2);
    assert_eq!(job["processed"], 1);
    assert_eq!(job["skipped"], 1);
    assert_eq!(job["failed"], 0);
    assert!(job["currentItem"].is_null());
    assert_eq!(job["results"].as_array().unwrap().len(), 2);
    assert_eq!(job["results"][1]["status"], "skipped");
    assert_eq!(job["results"][1]["reason"], "no_transcript");
    assert!(job.get("error").is_none());

    // The job bound the channel URL to its derived ID
    let sources: Value = client
        .get(format!("{}/sources", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sources["sources"][0]["source_id"], "@httpchannel");
    assert_eq!(sources["sources"][0]["source_url"], CHANNEL);
    assert_eq!(sources["sources"][0]["ingested_count"], 1);

    let sync: Value = client
        .get(format!("{}/sources/@httpchannel/sync", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sync["hasNew"], true);
    assert_eq!(sync["reason"], "count_gap");
    assert_eq!(sync["missingCount"], 1);

    let cleared: Value = client
        .post(format!("{}/sources/@httpchannel/retry-skips", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["cleared"], 1);
}

#[tokio::test]
async fn test_request_validation_and_not_found() {
    let server = start_server("TSYNC_TEST_VALIDATION_TOKEN").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/ingest-source", server.base))
        .json(&json!({ "sourceUrl": CHANNEL, "maxItems": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/ingest-source", server.base))
        .json(&json!({ "sourceUrl": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Malformed and mistyped bodies use the same error envelope
    let resp = client
        .post(format!("{}/ingest-source", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/ingest-item", server.base))
        .json(&json!({ "url": 42 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/ingest-item", server.base))
        .body("https://youtu.be/one")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .get(format!("{}/jobs/does-not-exist", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/sources/unknown/sync", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_sweep_requires_token() {
    let token_env = "TSYNC_TEST_SWEEP_TOKEN_HTTP";
    let server = start_server(token_env).await;
    let client = reqwest::Client::new();
    let url = format!("{}/sweep", server.base);

    // No token configured: endpoint disabled
    let resp = client.post(&url).bearer_auth("anything").send().await.unwrap();
    assert_eq!(resp.status(), 401);

    std::env::set_var(token_env, "let-me-in");

    let resp = client.post(&url).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    let resp = client.post(&url).bearer_auth("let-me-in").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["sourcesChecked"], 0);
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);
}
