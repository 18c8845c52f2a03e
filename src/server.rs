//! HTTP server for the chat UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Chat page; starts a session |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/upload` | Multipart `file` fields, indexed into `documents` |
//! | `POST` | `/chat` | Ask a question, JSON reply |
//! | `POST` | `/chat/stream` | Ask a question, server-sent events |
//! | `GET`  | `/messages` | History and per-namespace phase of the caller's session |
//! | `GET`  | `/status` | Status of every namespace |
//! | `GET`  | `/status/{namespace}` | Status of one namespace |
//! | `POST` | `/cache/{namespace}/clear` | Drop a namespace's index and files |
//!
//! # Error Contract
//!
//! Request-level failures return:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! Failures inside a chat turn are not request failures; they come back in
//! the reply's `error` and `notices` fields with status 200.
//!
//! # Streaming
//!
//! `POST /chat/stream` emits a `sources` event (with `notices`), then one
//! `delta` event per text fragment, then `done`. A model failure mid-stream
//! is sent as an `error` event before `done`.
//!
//! # Sessions
//!
//! The session id travels in the `docchat_session` cookie. Requests without
//! a known id get a fresh session and a `Set-Cookie` header. Sessions idle
//! past `session.idle_ttl_secs` are forgotten.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use docchat_core::models::SourceDocument;
use docchat_core::{Namespace, Turn};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatEngine, RetrievalMode, SourceRef};
use crate::config::Config;
use crate::extract::extract_text;
use crate::session::{session_cookie, session_from_cookie, SessionInfo};
use crate::store::NamespaceStatus;

const INDEX_HTML: &str = include_str!("../static/index.html");
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<ChatEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ChatEngine>) -> Self {
        Self { engine }
    }
}

/// Build the router with every route and the CORS layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/messages", get(handle_messages))
        .route("/status", get(handle_status_all))
        .route("/status/{namespace}", get(handle_status_one))
        .route("/cache/{namespace}/clear", post(handle_clear))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = ChatEngine::from_config(config).context("failed to initialise chat engine")?;
    let app = router(AppState::new(Arc::new(engine)));

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!(addr = %bind_addr, "docchat listening");
    println!("docchat listening on http://{}", bind_addr);

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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Malformed or incomplete JSON bodies get the same error shape as every
/// other bad request.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn parse_namespace(raw: &str) -> Result<Namespace, AppError> {
    raw.parse::<Namespace>()
        .map_err(|_| not_found(format!("unknown namespace: {}", raw)))
}

// ============ Sessions ============

/// The caller's session id, and whether it was created by this request.
struct SessionId {
    id: String,
    created: bool,
}

fn session_for(state: &AppState, headers: &HeaderMap) -> SessionId {
    let cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(session_from_cookie);

    let (id, created) = state.engine.sessions().resolve(cookie.as_deref());
    SessionId { id, created }
}

/// Attach `Set-Cookie` when the session is new.
fn with_session(session: &SessionId, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if session.created {
        if let Ok(value) = HeaderValue::from_str(&session_cookie(&session.id)) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

// ============ GET / and GET /health ============

async fn handle_index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = session_for(&state, &headers);
    with_session(&session, Html(INDEX_HTML))
}

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

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadedFile {
    file: String,
    chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    ok: bool,
    files: Vec<UploadedFile>,
}

/// Each `file` field is extracted and ingested on its own; one bad file
/// does not reject the others.
async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let session = session_for(&state, &headers);
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "upload.txt".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("could not read {}: {}", name, e)))?;

        let text = match extract_text(&name, &bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "extraction failed");
                files.push(UploadedFile {
                    file: name,
                    chunks: 0,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        let document = SourceDocument::new(name.clone(), text).with_title(name.clone());
        let uploaded = match state
            .engine
            .ingest(Some(&session.id), Namespace::Documents, document)
            .await
        {
            Ok(report) => UploadedFile {
                file: name,
                chunks: report.chunks,
                error: None,
            },
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "ingestion failed");
                UploadedFile {
                    file: name,
                    chunks: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        files.push(uploaded);
    }

    if files.is_empty() {
        return Err(bad_request("upload must contain at least one 'file' field"));
    }

    let ok = files.iter().all(|f| f.error.is_none());
    Ok(with_session(&session, Json(UploadResponse { ok, files })))
}

// ============ POST /chat and /chat/stream ============

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    spaces: Vec<String>,
    #[serde(default)]
    shared_space: Option<String>,
    #[serde(default)]
    workspace: Option<String>,
}

fn default_mode() -> String {
    "documents".to_string()
}

impl ChatBody {
    fn into_parts(self) -> Result<(String, RetrievalMode), AppError> {
        if self.message.trim().is_empty() {
            return Err(bad_request("message must not be empty"));
        }
        let mode = RetrievalMode::from_parts(
            &self.mode,
            self.spaces,
            self.shared_space.filter(|s| !s.trim().is_empty()),
            self.workspace.filter(|s| !s.trim().is_empty()),
        )
        .map_err(|e| bad_request(e.to_string()))?;
        Ok((self.message, mode))
    }
}

#[derive(Serialize)]
struct ChatResponse {
    ok: bool,
    reply: String,
    sources: Vec<SourceRef>,
    notices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let (message, mode) = json_body(body)?.into_parts()?;
    let session = session_for(&state, &headers);

    let reply = state.engine.ask(Some(&session.id), &mode, &message).await;
    let response = ChatResponse {
        ok: reply.error.is_none(),
        reply: reply.answer,
        sources: reply.sources,
        notices: reply.notices,
        error: reply.error,
    };
    Ok(with_session(&session, Json(response)))
}

#[derive(Serialize)]
struct SourcesEvent<'a> {
    sources: &'a [SourceRef],
    notices: &'a [String],
}

#[derive(Serialize)]
struct DeltaEvent<'a> {
    text: &'a str,
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let (message, mode) = json_body(body)?.into_parts()?;
    let session = session_for(&state, &headers);

    let reply = state
        .engine
        .ask_streaming(Some(session.id.clone()), &mode, &message)
        .await;

    let head = json_event(
        "sources",
        &SourcesEvent {
            sources: &reply.sources,
            notices: &reply.notices,
        },
    );
    let deltas = reply.deltas.map(|delta| match delta {
        Ok(text) => json_event("delta", &DeltaEvent { text: &text }),
        Err(e) => Event::default().event("error").data(e.to_string()),
    });

    let events = stream::once(async move { head })
        .chain(deltas)
        .chain(stream::once(async { Event::default().event("done").data("[DONE]") }))
        .map(Ok::<Event, Infallible>);

    let sse = Sse::new(events).keep_alive(KeepAlive::default());
    Ok(with_session(&session, sse))
}

// ============ GET /messages ============

#[derive(Serialize)]
struct MessagesResponse {
    session_id: String,
    #[serde(flatten)]
    info: Option<SessionInfo>,
    messages: Vec<Turn>,
}

async fn handle_messages(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = session_for(&state, &headers);
    let sessions = state.engine.sessions();
    let response = MessagesResponse {
        session_id: session.id.clone(),
        info: sessions.info(&session.id),
        messages: sessions.history(&session.id),
    };
    with_session(&session, Json(response))
}

// ============ Status and cache ============

#[derive(Serialize)]
struct StatusResponse {
    namespaces: Vec<NamespaceStatus>,
}

async fn handle_status_all(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        namespaces: state.engine.status(),
    })
}

async fn handle_status_one(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<NamespaceStatus>, AppError> {
    let namespace = parse_namespace(&namespace)?;
    Ok(Json(state.engine.stores().get(namespace).status()))
}

#[derive(Serialize)]
struct ClearResponse {
    ok: bool,
    namespace: Namespace,
}

async fn handle_clear(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<ClearResponse>, AppError> {
    let namespace = parse_namespace(&namespace)?;
    state.engine.clear(namespace).await.map_err(|e| {
        tracing::error!(namespace = %namespace, error = %e, "clear failed");
        internal(e.to_string())
    })?;
    tracing::info!(namespace = %namespace, "namespace cleared");
    Ok(Json(ClearResponse {
        ok: true,
        namespace,
    }))
}
