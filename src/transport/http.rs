//! warp routes for the research API
//!
//! ```text
//! POST /api/runs                 JSON {topic, documents?} or multipart (topic + file parts);
//!                                JSON documents must already live under the upload directory
//! GET  /api/runs                 run summaries, newest first
//! GET  /api/runs/:id             run status, stages, final output
//! GET  /api/runs/:id/events      event log snapshot
//! POST /api/runs/:id/clarify     resubmit with a clarification
//! GET  /ws/:id                   replayed + live events, then a terminal message
//! GET  /health /ready /live /metrics
//! ```

use bytes::BufMut;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::multipart::{FormData, Part};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use super::websocket::stream_run;
use crate::error::{CrewError, CrewResult, ErrorBody};
use crate::observability::metrics::metrics;
use crate::orchestrator::ResearchOrchestrator;
use crate::pipeline::run::{DocumentRef, PipelineRun, RunId, RunStatus};
use crate::pipeline::stage::StageInstance;
use crate::preflight::{HealthCheckManager, HealthCheckResult};
use crate::registry::RunRegistry;

const MAX_JSON_BYTES: u64 = 64 * 1024;
const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Everything a handler needs, cloned into each route
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ResearchOrchestrator>,
    pub health: Arc<HealthCheckManager>,
    pub upload_dir: PathBuf,
}

impl ApiState {
    pub fn new(
        orchestrator: Arc<ResearchOrchestrator>,
        health: Arc<HealthCheckManager>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            orchestrator,
            health,
            upload_dir: upload_dir.into(),
        }
    }

    fn registry(&self) -> &Arc<RunRegistry> {
        self.orchestrator.registry()
    }
}

#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    topic: String,
    #[serde(default)]
    documents: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ClarifyRequest {
    clarification: String,
}

#[derive(Debug, Serialize)]
struct RunAccepted {
    run_id: RunId,
}

#[derive(Debug, Serialize)]
struct RunStatusResponse {
    run_id: RunId,
    topic: String,
    status: &'static str,
    stages: Vec<StageInstance>,
    final_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<PipelineRun> for RunStatusResponse {
    fn from(run: PipelineRun) -> Self {
        let error = match run.overall_status {
            RunStatus::Failed => run.error().map(str::to_string),
            _ => None,
        };
        Self {
            run_id: run.run_id,
            topic: run.topic,
            status: run.overall_status.as_api_str(),
            stages: run.stages,
            final_output: run.final_output,
            error,
            created_at: run.created_at,
            finished_at: run.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunListEntry {
    run_id: RunId,
    topic: String,
    status: &'static str,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: u64,
    uptime_seconds: u64,
    retained_runs: usize,
    checks: Vec<HealthCheckResult>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

fn with_state(state: ApiState) -> impl Filter<Extract = (ApiState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_with_status<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_reply(error: &CrewError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_with_status(&error.to_error_body(), status)
}

fn accepted(run_id: RunId) -> Response {
    json_with_status(&RunAccepted { run_id }, StatusCode::ACCEPTED)
}

/// Every route, with CORS, rejection rendering, and request spans applied
pub fn routes(state: ApiState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let create_json = warp::path!("api" / "runs")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_JSON_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(create_run);

    let create_multipart = warp::path!("api" / "runs")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_state(state.clone()))
        .and_then(create_run_multipart);

    let list = warp::path!("api" / "runs")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_runs);

    let status = warp::path!("api" / "runs" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_run);

    let events = warp::path!("api" / "runs" / String / "events")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_events);

    let clarify = warp::path!("api" / "runs" / String / "clarify")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_JSON_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(clarify_run);

    let stream = warp::path!("ws" / String)
        .and(warp::ws())
        .and(with_state(state.clone()))
        .and_then(open_stream);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(health_status);

    let ready = warp::path!("ready")
        .and(warp::get())
        .and(with_state(state))
        .and_then(readiness);

    let live = warp::path!("live").and(warp::get()).map(|| {
        warp::reply::json(&LivenessResponse {
            alive: true,
            timestamp: current_timestamp(),
        })
    });

    let metrics_route = warp::path!("metrics")
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    let root = warp::path::end().and(warp::get()).map(|| {
        let endpoints = HashMap::from([
            ("/api/runs", "Submit a research topic (POST) or list runs (GET)"),
            ("/api/runs/:id", "Run status, stage results, and final output"),
            ("/api/runs/:id/events", "Event log for a run"),
            ("/api/runs/:id/clarify", "Resubmit a run's topic with a clarification"),
            ("/ws/:id", "Live event stream for a run"),
            ("/health", "Overall health status with detailed checks"),
            ("/ready", "Readiness probe"),
            ("/live", "Liveness probe"),
            ("/metrics", "Run, stage, and delivery statistics"),
        ]);
        warp::reply::json(&ApiDocumentationResponse { endpoints })
    });

    create_json
        .or(create_multipart)
        .or(list)
        .or(status)
        .or(events)
        .or(clarify)
        .or(stream)
        .or(health)
        .or(ready)
        .or(live)
        .or(metrics_route)
        .or(root)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST"])
                .allow_headers(vec!["content-type"]),
        )
        .recover(handle_rejection)
        .with(warp::trace(|info| {
            crate::request_span!(method = %info.method(), path = %info.path())
        }))
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve(
    state: ApiState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> CrewResult<()> {
    let (bound, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| CrewError::collaborator_unavailable("http server", e.to_string()))?;

    info!(addr = %bound, "Research API listening");
    server.await;
    info!("Research API stopped");
    Ok(())
}

async fn create_run(request: CreateRunRequest, state: ApiState) -> Result<Response, Infallible> {
    let mut documents = Vec::with_capacity(request.documents.len());
    for path in &request.documents {
        match uploaded_document(&state.upload_dir, path).await {
            Ok(document) => documents.push(document),
            Err(e) => return Ok(error_reply(&e)),
        }
    }

    Ok(match state.orchestrator.submit(&request.topic, documents).await {
        Ok(run_id) => accepted(run_id),
        Err(e) => error_reply(&e),
    })
}

/// Resolve a JSON document reference; only files already inside `upload_dir` are accepted
///
/// Relative paths are taken relative to `upload_dir`. Symlinks and `..` are resolved before the
/// containment check.
async fn uploaded_document(upload_dir: &Path, path: &Path) -> CrewResult<DocumentRef> {
    let rejected = || {
        CrewError::invalid_input(format!(
            "document {} is not an uploaded file",
            path.display()
        ))
    };

    let root = tokio::fs::canonicalize(upload_dir)
        .await
        .map_err(|_| rejected())?;
    let resolved = tokio::fs::canonicalize(upload_dir.join(path))
        .await
        .map_err(|_| rejected())?;

    let is_file = tokio::fs::metadata(&resolved)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false);

    if resolved.starts_with(&root) && is_file {
        Ok(DocumentRef::from_path(resolved))
    } else {
        warn!(document = %path.display(), "Rejected document outside upload directory");
        Err(rejected())
    }
}

async fn create_run_multipart(form: FormData, state: ApiState) -> Result<Response, Infallible> {
    let upload = match read_upload(form, &state.upload_dir).await {
        Ok(upload) => upload,
        Err(e) => return Ok(error_reply(&e)),
    };

    match state
        .orchestrator
        .submit(&upload.topic, upload.documents.clone())
        .await
    {
        Ok(run_id) => Ok(accepted(run_id)),
        Err(e) => {
            discard_uploads(&upload.documents).await;
            Ok(error_reply(&e))
        }
    }
}

async fn list_runs(state: ApiState) -> Result<Response, Infallible> {
    let runs: Vec<RunListEntry> = state
        .registry()
        .list()
        .await
        .into_iter()
        .map(|summary| RunListEntry {
            run_id: summary.run_id,
            topic: summary.topic,
            status: summary.status.as_api_str(),
            created_at: summary.created_at,
            finished_at: summary.finished_at,
        })
        .collect();

    Ok(warp::reply::json(&serde_json::json!({ "runs": runs })).into_response())
}

async fn lookup(state: &ApiState, id: &str) -> CrewResult<PipelineRun> {
    let run_id: RunId = id.parse()?;
    state
        .registry()
        .snapshot(run_id)
        .await
        .ok_or_else(|| CrewError::run_not_found(run_id))
}

async fn get_run(id: String, state: ApiState) -> Result<Response, Infallible> {
    Ok(match lookup(&state, &id).await {
        Ok(run) => warp::reply::json(&RunStatusResponse::from(run)).into_response(),
        Err(e) => error_reply(&e),
    })
}

async fn get_events(id: String, state: ApiState) -> Result<Response, Infallible> {
    let run = match lookup(&state, &id).await {
        Ok(run) => run,
        Err(e) => return Ok(error_reply(&e)),
    };

    let events = state.registry().broadcaster().events(run.run_id).await;
    Ok(warp::reply::json(&serde_json::json!({
        "run_id": run.run_id,
        "events": events,
    }))
    .into_response())
}

async fn clarify_run(
    id: String,
    request: ClarifyRequest,
    state: ApiState,
) -> Result<Response, Infallible> {
    let run_id: RunId = match id.parse() {
        Ok(run_id) => run_id,
        Err(e) => return Ok(error_reply(&e)),
    };

    Ok(
        match state
            .orchestrator
            .clarify(run_id, &request.clarification)
            .await
        {
            Ok(new_run_id) => accepted(new_run_id),
            Err(e) => error_reply(&e),
        },
    )
}

async fn open_stream(
    id: String,
    ws: warp::ws::Ws,
    state: ApiState,
) -> Result<Response, Infallible> {
    let run_id = match lookup(&state, &id).await {
        Ok(run) => run.run_id,
        Err(e) => return Ok(error_reply(&e)),
    };

    let broadcaster = state.registry().broadcaster();
    Ok(ws
        .on_upgrade(move |socket| stream_run(socket, broadcaster, run_id))
        .into_response())
}

async fn health_status(state: ApiState) -> Result<Response, Infallible> {
    let (healthy, checks) = state.health.calculate_overall_health().await;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        timestamp: current_timestamp(),
        uptime_seconds: metrics().get_metrics().uptime_seconds,
        retained_runs: state.registry().len().await,
        checks,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(json_with_status(&response, status))
}

async fn readiness(state: ApiState) -> Result<Response, Infallible> {
    let ready = state
        .health
        .run_health_checks()
        .await
        .iter()
        .all(|check| check.healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(json_with_status(
        &ReadinessResponse {
            ready,
            timestamp: current_timestamp(),
        },
        status,
    ))
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {e}"))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected application/json or multipart/form-data".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, e.to_string())
    } else {
        warn!(rejection = ?err, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    let body = ErrorBody {
        error: message,
        timestamp: current_timestamp(),
    };
    Ok(json_with_status(&body, status))
}

struct Upload {
    topic: String,
    documents: Vec<DocumentRef>,
}

/// Save file parts under `upload_dir` and collect the topic field
async fn read_upload(form: FormData, upload_dir: &Path) -> CrewResult<Upload> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| CrewError::collaborator_unavailable("uploads", e.to_string()))?;

    let batch = Uuid::new_v4();
    let mut topic = String::new();
    let mut documents = Vec::new();

    match read_parts(form, upload_dir, batch, &mut topic, &mut documents).await {
        Ok(()) => Ok(Upload { topic, documents }),
        Err(e) => {
            discard_uploads(&documents).await;
            Err(e)
        }
    }
}

async fn read_parts(
    form: FormData,
    upload_dir: &Path,
    batch: Uuid,
    topic: &mut String,
    documents: &mut Vec<DocumentRef>,
) -> CrewResult<()> {
    futures::pin_mut!(form);

    while let Some(part) = form
        .try_next()
        .await
        .map_err(|e| CrewError::invalid_input(format!("malformed multipart body: {e}")))?
    {
        let field = part.name().to_string();
        let filename = part.filename().map(str::to_string);
        let data = read_part(part).await?;

        match (field.as_str(), filename) {
            ("topic", None) => *topic = String::from_utf8_lossy(&data).into_owned(),
            (_, Some(filename)) => {
                let path = upload_dir.join(format!("{batch}_{}", safe_file_name(&filename)));
                tokio::fs::write(&path, &data)
                    .await
                    .map_err(|e| CrewError::collaborator_unavailable("uploads", e.to_string()))?;
                debug!(file = %path.display(), bytes = data.len(), "Saved upload");
                documents.push(DocumentRef::new(path, filename));
            }
            (other, None) => debug!(field = other, "Ignoring multipart field"),
        }
    }

    Ok(())
}

async fn read_part(part: Part) -> CrewResult<Vec<u8>> {
    part.stream()
        .try_fold(Vec::new(), |mut buffer, chunk| async move {
            buffer.put(chunk);
            Ok(buffer)
        })
        .await
        .map_err(|e| CrewError::invalid_input(format!("failed to read upload: {e}")))
}

async fn discard_uploads(documents: &[DocumentRef]) {
    for document in documents {
        if let Err(e) = tokio::fs::remove_file(&document.path).await {
            debug!(file = %document.path.display(), error = %e, "Could not remove upload");
        }
    }
}

/// Final path component with anything outside `[A-Za-z0-9._-]` replaced
fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::executor::SequentialExecutor;
    use crate::pipeline::stage::StageCatalog;
    use crate::progress::ProgressBroadcaster;
    use crate::testing::mocks::{MockDocumentExtractor, StubAgentExecutor};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::TempDir;

    fn state(agent: StubAgentExecutor, upload_dir: &Path) -> ApiState {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let registry = Arc::new(RunRegistry::new(broadcaster.clone(), 20));
        let executor = SequentialExecutor::new(
            Arc::new(StageCatalog::default()),
            Arc::new(agent),
            Arc::new(MockDocumentExtractor::returning("extracted")),
            broadcaster,
            Duration::from_secs(5),
        );
        let orchestrator = Arc::new(ResearchOrchestrator::new(registry, Arc::new(executor)));
        ApiState::new(orchestrator, Arc::new(HealthCheckManager::new()), upload_dir)
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    async fn wait_for_terminal(state: &ApiState, run_id: RunId) {
        let mut subscription = state
            .registry()
            .broadcaster()
            .subscribe(run_id)
            .await
            .unwrap();
        while let Some(event) = subscription.receiver.recv().await {
            if event.event_type.is_terminal() {
                break;
            }
        }
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("report.pdf"), "report.pdf");
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("C:\\docs\\q3 plan.txt"), "q3_plan.txt");
        assert_eq!(safe_file_name(".."), "upload");
    }

    #[tokio::test]
    async fn test_submit_json_and_fetch_status() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new(), dir.path());
        let filter = routes(state.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/api/runs")
            .json(&json!({ "topic": "renewable energy" }))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let run_id: RunId = body_json(response.body())["run_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();

        wait_for_terminal(&state, run_id).await;

        let response = warp::test::request()
            .path(&format!("/api/runs/{run_id}"))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.body());
        assert_eq!(body["status"], "completed");
        assert_eq!(body["final_output"], "OK:finalize");
        assert!(body.get("error").is_none());
        assert_eq!(body["stages"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_run_reports_error_status() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new().failing_on("analysis"), dir.path());
        let filter = routes(state.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/api/runs")
            .json(&json!({ "topic": "fusion" }))
            .reply(&filter)
            .await;
        let run_id: RunId = body_json(response.body())["run_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        wait_for_terminal(&state, run_id).await;

        let response = warp::test::request()
            .path(&format!("/api/runs/{run_id}"))
            .reply(&filter)
            .await;
        let body = body_json(response.body());
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "stub failure in analysis");
        assert_eq!(
            body["final_output"],
            "Pipeline failed at stage 'analysis': stub failure in analysis"
        );
    }

    #[tokio::test]
    async fn test_empty_topic_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new(), dir.path());
        let filter = routes(state.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/api/runs")
            .json(&json!({ "topic": "   " }))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response.body())["error"]
            .as_str()
            .unwrap()
            .contains("Invalid input"));
        assert!(state.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_json_document_outside_upload_dir_is_rejected() {
        let uploads = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let secret = elsewhere.path().join("server_secret.txt");
        std::fs::write(&secret, "DB_PASSWORD=hunter2").unwrap();
        let state = state(StubAgentExecutor::new(), uploads.path());
        let filter = routes(state.clone());

        let sibling = Path::new("..")
            .join(elsewhere.path().file_name().unwrap())
            .join("server_secret.txt");
        for document in [secret.clone(), sibling, PathBuf::from("/etc/passwd")] {
            let response = warp::test::request()
                .method("POST")
                .path("/api/runs")
                .json(&json!({ "topic": "anything", "documents": [document] }))
                .reply(&filter)
                .await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{document:?}");
            let body = String::from_utf8_lossy(response.body()).into_owned();
            assert!(!body.contains("hunter2"));
        }
        assert!(state.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_json_document_inside_upload_dir_is_accepted() {
        let uploads = TempDir::new().unwrap();
        std::fs::write(uploads.path().join("notes.txt"), "tidal data").unwrap();
        let state = state(StubAgentExecutor::new(), uploads.path());
        let filter = routes(state.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/api/runs")
            .json(&json!({ "topic": "tides", "documents": ["notes.txt"] }))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let run_id: RunId = body_json(response.body())["run_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        let run = state.registry().snapshot(run_id).await.unwrap();
        assert_eq!(run.document_refs.len(), 1);
        assert_eq!(run.document_refs[0].name, "notes.txt");
    }

    #[tokio::test]
    async fn test_missing_topic_field_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let filter = routes(state(StubAgentExecutor::new(), dir.path()));

        let response = warp::test::request()
            .method("POST")
            .path("/api/runs")
            .json(&json!({ "documents": [] }))
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_multipart_upload_saves_files() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new(), dir.path());
        let filter = routes(state.clone());

        let boundary = "research-crew-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"topic\"\r\n\r\n\
             battery recycling\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"notes.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             lithium recovery rates\r\n\
             --{boundary}--\r\n"
        );

        let response = warp::test::request()
            .method("POST")
            .path("/api/runs")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let run_id: RunId = body_json(response.body())["run_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        let run = state.registry().snapshot(run_id).await.unwrap();
        assert_eq!(run.topic, "battery recycling");
        assert_eq!(run.document_refs.len(), 1);
        assert_eq!(run.document_refs[0].name, "notes.txt");

        let saved = &run.document_refs[0].path;
        assert!(saved.starts_with(dir.path()));
        assert!(saved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_notes.txt"));
        assert_eq!(
            std::fs::read_to_string(saved).unwrap(),
            "lithium recovery rates"
        );
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let dir = TempDir::new().unwrap();
        let filter = routes(state(StubAgentExecutor::new(), dir.path()));

        for path in [
            format!("/api/runs/{}", RunId::new()),
            format!("/api/runs/{}/events", RunId::new()),
            "/api/runs/not-a-run".to_string(),
        ] {
            let response = warp::test::request().path(&path).reply(&filter).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
            assert!(body_json(response.body())["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_events_endpoint_returns_log() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new(), dir.path());
        let run = state
            .orchestrator
            .run_to_completion("ocean currents", vec![])
            .await
            .unwrap();
        let filter = routes(state);

        let response = warp::test::request()
            .path(&format!("/api/runs/{}/events", run.run_id))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response.body());
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 11);
        assert_eq!(events[0]["type"], "stage_started");
        assert_eq!(events[10]["type"], "run_completed");
    }

    #[tokio::test]
    async fn test_list_runs_uses_api_status() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new().failing_on("web_search"), dir.path());
        state
            .orchestrator
            .run_to_completion("tides", vec![])
            .await
            .unwrap();
        let filter = routes(state);

        let response = warp::test::request()
            .path("/api/runs")
            .reply(&filter)
            .await;
        let body = body_json(response.body());
        let runs = body["runs"].as_array().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["status"], "error");
        assert_eq!(runs[0]["topic"], "tides");
    }

    #[tokio::test]
    async fn test_clarify_submits_new_run() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new(), dir.path());
        let run = state
            .orchestrator
            .run_to_completion("solar", vec![])
            .await
            .unwrap();
        let filter = routes(state.clone());

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/api/runs/{}/clarify", run.run_id))
            .json(&json!({ "clarification": "residential only" }))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let new_run_id: RunId = body_json(response.body())["run_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_ne!(new_run_id, run.run_id);

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/api/runs/{}/clarify", run.run_id))
            .json(&json!({ "clarification": "" }))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_websocket_replays_then_sends_terminal_message() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new(), dir.path());
        let run = state
            .orchestrator
            .run_to_completion("deep sea mining", vec![])
            .await
            .unwrap();
        let filter = routes(state);

        let mut client = warp::test::ws()
            .path(&format!("/ws/{}", run.run_id))
            .handshake(filter)
            .await
            .unwrap();

        let mut event_types = Vec::new();
        loop {
            let message = client.recv().await.unwrap();
            let value: Value = serde_json::from_str(message.to_str().unwrap()).unwrap();
            let kind = value["type"].as_str().unwrap().to_string();
            if kind == "task_complete" {
                assert_eq!(value["result"], "OK:finalize");
                assert_eq!(value["run_id"], run.run_id.to_string());
                break;
            }
            event_types.push(kind);
        }

        assert_eq!(event_types.len(), 11);
        assert_eq!(event_types.last().map(String::as_str), Some("run_completed"));
    }

    #[tokio::test]
    async fn test_websocket_run_without_event_log_gets_error_and_close() {
        let dir = TempDir::new().unwrap();
        let state = state(StubAgentExecutor::new(), dir.path());
        let run = state
            .orchestrator
            .run_to_completion("glaciers", vec![])
            .await
            .unwrap();
        // Log dropped after the route's registry lookup would succeed
        state.registry().broadcaster().remove_run(run.run_id).await;
        let filter = routes(state);

        let mut client = warp::test::ws()
            .path(&format!("/ws/{}", run.run_id))
            .handshake(filter)
            .await
            .unwrap();

        let message = client.recv().await.unwrap();
        let value: Value = serde_json::from_str(message.to_str().unwrap()).unwrap();
        assert_eq!(value["type"], "task_error");
        assert_eq!(value["run_id"], run.run_id.to_string());
        if let Ok(message) = client.recv().await {
            assert!(message.is_close());
        }
    }

    #[tokio::test]
    async fn test_websocket_unknown_run_is_rejected() {
        let dir = TempDir::new().unwrap();
        let filter = routes(state(StubAgentExecutor::new(), dir.path()));

        let result = warp::test::ws()
            .path(&format!("/ws/{}", RunId::new()))
            .handshake(filter)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let dir = TempDir::new().unwrap();
        let filter = routes(state(StubAgentExecutor::new(), dir.path()));

        let response = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response.body())["status"], "healthy");

        let response = warp::test::request().path("/ready").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response.body())["ready"], true);

        let response = warp::test::request().path("/live").reply(&filter).await;
        assert_eq!(body_json(response.body())["alive"], true);

        let response = warp::test::request().path("/metrics").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response.body())["runs"].is_object());

        let response = warp::test::request().path("/nope").reply(&filter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
