//! HTTP server.
//!
//! Runs reasoning turns for browser and API clients, streaming every
//! [`StreamChunk`](ragloop_core::models::StreamChunk) as a server-sent event.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/workspaces/{slug}/react-chat` | Run one turn; `text/event-stream` response |
//!
//! # Error Contract
//!
//! Errors raised before the stream opens use:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "workspace not found: handbook" } }
//! ```
//!
//! Once the stream is open, failures arrive as an `abort` chunk instead.
//!
//! # Disconnects
//!
//! The turn runs on its own task. When the client drops the connection the
//! event stream (and with it the channel receiver) is dropped, which the
//! loop observes through its emitter's closed flag.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::react::{begin_reasoning_turn, ReactDeps, TurnRequest};
use crate::stream::ChannelEmitter;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    deps: Arc<ReactDeps>,
}

impl AppState {
    pub fn new(config: Arc<Config>, deps: Arc<ReactDeps>) -> Self {
        Self { config, deps }
    }
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/workspaces/{slug}/react-chat", post(handle_react_chat))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let deps = Arc::new(ReactDeps::from_config(config, &pool)?);
    let state = AppState::new(Arc::new(config.clone()), deps);
    let bind_addr = config.server.bind.clone();

    tracing::info!(
        workspaces = config.workspaces.len(),
        backend = %config.retrieval.backend,
        "server starting"
    );
    println!("rloop server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;

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

// ============ Handlers ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    attachments: Vec<serde_json::Value>,
}

async fn handle_react_chat(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let workspace = state
        .config
        .workspace(&slug)
        .ok_or_else(|| not_found(format!("workspace not found: {}", slug)))?;
    if body.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let request = TurnRequest {
        message: body.message,
        user_id: body.user_id,
        thread_id: body.thread_id,
        attachments: body.attachments,
    };

    let (emitter, receiver) = ChannelEmitter::new();
    let deps = Arc::clone(&state.deps);
    tokio::spawn(async move {
        let outcome = begin_reasoning_turn(&deps, &emitter, &workspace, request).await;
        tracing::debug!(workspace = %workspace.slug, ?outcome, "turn finished");
    });

    let stream = UnboundedReceiverStream::new(receiver).filter_map(|chunk| {
        match serde_json::to_string(&chunk) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize stream chunk");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
