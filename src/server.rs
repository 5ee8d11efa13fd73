//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ingest-item` | Ingest one item synchronously, returns its outcome |
//! | `POST` | `/ingest-source` | Start a background job for a source, returns `{ jobId }` |
//! | `GET`  | `/jobs/{id}` | Poll a job |
//! | `GET`  | `/sources` | List registered sources |
//! | `GET`  | `/sources/{id}/sync` | Run the sync checker for one source |
//! | `POST` | `/sources/{id}/retry-skips` | Clear a source's skip records |
//! | `POST` | `/sweep` | Run a sweep now (bearer token required) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "sourceUrl must not be empty" } }
//! ```
//!
//! Malformed or mistyped JSON bodies are reported as `bad_request`.
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `sweep_in_progress` (409), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::Engine;
use crate::jobs::JobSnapshot;
use crate::models::{Outcome, SourceRecord};
use crate::orchestrator::SourceRequest;
use crate::pipeline::ProcessOptions;
use crate::sweep::{spawn_sweep_scheduler, SweepReport};
use crate::sync_check::SyncDecision;
use crate::ytdlp::item_ref_from_url;

type AppState = Arc<Engine>;

/// Builds the router. Exposed separately from [`run_server`] so tests can
/// serve it on their own listener.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest-item", post(handle_ingest_item))
        .route("/ingest-source", post(handle_ingest_source))
        .route("/jobs/{id}", get(handle_get_job))
        .route("/sources", get(handle_list_sources))
        .route("/sources/{id}/sync", get(handle_sync_check))
        .route("/sources/{id}/retry-skips", post(handle_retry_skips))
        .route("/sweep", post(handle_sweep))
        .layer(cors)
        .with_state(engine)
}

/// Starts the HTTP server on `[server].bind` and, when enabled, the
/// periodic sweep. Runs until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config.server.bind.clone();

    if engine.config.sweep.enabled {
        let interval = std::time::Duration::from_secs(engine.config.sweep.interval_secs);
        tracing::info!(interval_secs = interval.as_secs(), "periodic sweep enabled");
        spawn_sweep_scheduler(engine.sweeper.clone(), interval);
    }

    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn conflict(code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code,
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest-item ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestItemRequest {
    url: String,
    #[serde(default)]
    source_id: Option<String>,
}

/// Runs the pipeline for one item and returns its outcome. Skips and
/// failures are ordinary outcomes, not HTTP errors.
async fn handle_ingest_item(
    State(engine): State<AppState>,
    body: Result<Json<IngestItemRequest>, JsonRejection>,
) -> Result<Json<Outcome>, AppError> {
    let Json(req) = body?;
    if req.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    let item = item_ref_from_url(&req.url).map_err(|e| bad_request(format!("{:#}", e)))?;

    let opts = ProcessOptions {
        skip_if_known: true,
        source_id: req.source_id.filter(|s| !s.trim().is_empty()),
    };
    Ok(Json(engine.pipeline.process(&item, &opts).await))
}

// ============ POST /ingest-source ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
}

async fn handle_ingest_source(
    State(engine): State<AppState>,
    body: Result<Json<SourceRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, AppError> {
    let Json(req) = body?;
    if req.source_url.trim().is_empty() {
        return Err(bad_request("sourceUrl must not be empty"));
    }
    if req.max_items == 0 {
        return Err(bad_request("maxItems must be greater than 0"));
    }

    let job_id = engine.orchestrator.submit(req);
    Ok(Json(SubmitResponse { job_id }))
}

// ============ GET /jobs/{id} ============

async fn handle_get_job(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    engine
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no job with id: {}", id)))
}

// ============ GET /sources ============

#[derive(Serialize)]
struct SourceView {
    #[serde(flatten)]
    record: SourceRecord,
    ingested_count: i64,
}

#[derive(Serialize)]
struct SourceListResponse {
    sources: Vec<SourceView>,
}

async fn handle_list_sources(
    State(engine): State<AppState>,
) -> Result<Json<SourceListResponse>, AppError> {
    let records = engine.store.list_sources().await.map_err(internal)?;
    let mut sources = Vec::with_capacity(records.len());
    for record in records {
        let ingested_count = engine
            .store
            .count_items_for_source(&record.source_id)
            .await
            .map_err(internal)?;
        sources.push(SourceView {
            record,
            ingested_count,
        });
    }
    Ok(Json(SourceListResponse { sources }))
}

// ============ GET /sources/{id}/sync ============

async fn handle_sync_check(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncDecision>, AppError> {
    let record = engine
        .store
        .get_source(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no source with id: {}", id)))?;
    if record.source_url.is_none() {
        return Err(bad_request(format!("source {} has no known URL yet", id)));
    }

    engine
        .sweeper
        .checker()
        .needs_sync(&id)
        .await
        .map(Json)
        .map_err(internal)
}

// ============ POST /sources/{id}/retry-skips ============

async fn handle_retry_skips(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cleared = engine.store.clear_skips(&id).await.map_err(internal)?;
    tracing::info!(source_id = %id, cleared, "cleared skip records");
    engine
        .pipeline
        .collaborators()
        .events
        .log_event(
            "skips_cleared",
            &format!("Cleared {} skip records for {}", cleared, id),
            Some(json!({ "source_id": id, "cleared": cleared })),
        )
        .await;
    Ok(Json(json!({ "sourceId": id, "cleared": cleared })))
}

// ============ POST /sweep ============

async fn handle_sweep(
    State(engine): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, AppError> {
    authorize_sweep(&engine.config.server.sweep_token_env, &headers)?;

    match engine.sweeper.try_run().await.map_err(internal)? {
        Some(report) => Ok(Json(report)),
        None => Err(conflict("sweep_in_progress", "a sweep is already running")),
    }
}

/// Checks the bearer token against the one configured in `token_env`.
///
/// Both sides are hashed before comparing so the comparison time does
/// not depend on how much of the token matched.
fn authorize_sweep(token_env: &str, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = std::env::var(token_env)
        .ok()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| unauthorized("sweep endpoint is disabled: no token configured"))?;

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| unauthorized("missing bearer token"))?;

    if Sha256::digest(provided.as_bytes()) != Sha256::digest(expected.as_bytes()) {
        return Err(unauthorized("invalid token"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(auth) = auth {
            h.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        }
        h
    }

    #[test]
    fn sweep_auth_requires_configured_token() {
        let env = "TSYNC_TEST_TOKEN_UNSET_9F2C";
        let err = authorize_sweep(env, &headers(Some("Bearer x"))).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn sweep_auth_compares_tokens() {
        let env = "TSYNC_TEST_TOKEN_SET_41AA";
        std::env::set_var(env, "s3cret");

        assert!(authorize_sweep(env, &headers(Some("Bearer s3cret"))).is_ok());
        assert!(authorize_sweep(env, &headers(Some("Bearer wrong"))).is_err());
        assert!(authorize_sweep(env, &headers(Some("s3cret"))).is_err());
        assert!(authorize_sweep(env, &headers(None)).is_err());
    }
}
