//! HTTP API for compiling LaTeX sources.
//!
//! Routes:
//! - `POST /api/xelatex`: multipart upload, one file
//! - `POST /api/xelatex/body`: raw request body
//! - `POST /api/xelatex/session`: issue a session id
//! - `PUT /api/xelatex/session/{session}`: compile inside a session's workspace
//! - `GET /health`
//!
//! Every compile route answers with the PDF on success and with a
//! `text/plain` diagnostic on failure.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use futures::{Stream, TryStreamExt};
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::compiler::Engine;
use crate::error::JobError;
use crate::orchestrator::{Job, Orchestrator};
use crate::session::SessionRegistry;
use crate::workspace::is_safe_name;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: SessionRegistry,
    /// Parent of every job's cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            sessions: SessionRegistry::new(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Failures reported to API clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request did not carry a usable upload.
    #[error("{0}")]
    Upload(String),

    /// Session id was never issued and has no workspace on disk.
    #[error("Session {0} not found")]
    UnknownSession(String),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ApiError::Job(e) if e.is_cancelled() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Job(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Job(JobError::Diagnostic { source, .. }) => {
                tracing::info!(error = %source, "Compilation rejected with engine log");
            }
            other => tracing::warn!(status = %status, "Request failed: {}", other),
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("An error occurred while processing your request.\n{}", self),
        )
            .into_response()
    }
}

/// Optional `?engine=` parameter.
#[derive(Debug, Default, Deserialize)]
struct EngineQuery {
    engine: Option<Engine>,
}

/// The compile API.
pub struct RenderApi;

impl RenderApi {
    /// Build the axum router with state applied.
    pub fn router(state: AppState, max_body_bytes: usize) -> Router {
        Router::new()
            .route("/api/xelatex", post(upload_file))
            .route("/api/xelatex/body", post(upload_body))
            .route("/api/xelatex/session", post(create_session))
            .route("/api/xelatex/session/{session}", put(compile_session))
            .route("/health", get(health_check))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(RequestBodyLimitLayer::new(max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

// -- Handlers --

async fn health_check() -> &'static str {
    "ok"
}

async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<EngineQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Upload(e.body_text()))?
        {
            Some(field) if field.file_name().is_some() => break field,
            Some(_) => continue,
            None => return Err(ApiError::Upload("No file was uploaded.".to_string())),
        }
    };

    let stem = field.file_name().and_then(upload_stem).map(str::to_string);
    let name = stem
        .as_deref()
        .filter(|stem| is_safe_name(stem))
        .map(str::to_string)
        .unwrap_or_else(random_job_name);
    let download = format!("{}.pdf", stem.as_deref().unwrap_or(&name));
    let job = Job::transient(name, query.engine.unwrap_or(Engine::Xelatex));

    compile_to_response(&state, stream_reader(field), job, download).await
}

async fn upload_body(
    State(state): State<AppState>,
    Query(query): Query<EngineQuery>,
    body: Body,
) -> Result<Response, ApiError> {
    let job = Job::transient(random_job_name(), query.engine.unwrap_or(Engine::Xelatex));
    let download = job.artifact_file();
    compile_to_response(&state, stream_reader(body.into_data_stream()), job, download).await
}

async fn create_session(State(state): State<AppState>) -> String {
    let session_id = state.sessions.create().await;
    let known = state.sessions.known_count().await;
    tracing::info!(
        session = %session_id,
        known = known,
        "Created session"
    );
    session_id
}

async fn compile_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<EngineQuery>,
    body: Body,
) -> Result<Response, ApiError> {
    let workspaces = state.orchestrator.workspaces();
    if !state.sessions.is_known(&session_id, workspaces).await {
        return Err(ApiError::UnknownSession(session_id));
    }

    // Overlapping requests for one session queue here.
    let _guard = state.sessions.lock(&session_id).await;

    let workspace = workspaces.resolve_persistent(&session_id).await?;
    let engine = query.engine.unwrap_or(Engine::Latexmk);
    let job = Job::persistent(session_id, engine, workspace);
    let download = job.artifact_file();

    compile_to_response(&state, stream_reader(body.into_data_stream()), job, download).await
}

/// Run `job` and answer with the PDF, offered for download as `download`.
async fn compile_to_response<R>(
    state: &AppState,
    source: R,
    job: Job,
    download: String,
) -> Result<Response, ApiError>
where
    R: AsyncRead + Unpin + Send,
{
    let cancel = state.shutdown.child_token();
    let pdf = state.orchestrator.compile(source, job, &cancel).await?;
    Ok(pdf_response(pdf, &download))
}

fn pdf_response(pdf: Vec<u8>, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(filename)),
        ],
        pdf,
    )
        .into_response()
}

/// `Content-Disposition` for a download named `filename`.
///
/// Names that fit in a quoted string are sent as is. Anything else gets an
/// ASCII fallback plus an RFC 5987 `filename*` carrying the UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let quotable = |c: char| (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\';
    if filename.chars().all(quotable) {
        return format!("attachment; filename=\"{}\"", filename);
    }

    let fallback: String = filename
        .chars()
        .map(|c| if quotable(c) { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

/// Adapt a body stream into a reader the orchestrator can copy from.
fn stream_reader<S, E>(stream: S) -> impl AsyncRead + Unpin + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    StreamReader::new(Box::pin(stream.map_err(std::io::Error::other)))
}

/// Client-supplied file name without directories or its last extension.
fn upload_stem(filename: &str) -> Option<&str> {
    let name = filename.rsplit(['/', '\\']).next()?;
    let stem = name.rfind('.').map_or(name, |dot| &name[..dot]);
    (!stem.is_empty()).then_some(stem)
}

fn random_job_name() -> String {
    Uuid::new_v4().to_string()
}
