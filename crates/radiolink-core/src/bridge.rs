//! HTTP bridge for the browser UI.
//!
//! Exposes the dispatcher as a small JSON API and serves the built UI from
//! a static directory. Every command goes through the same dispatcher lock
//! as the poller.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::report::ReportEntry;
use crate::telemetry::{SharedDispatcher, SharedHistory, ShutdownSignal, TelemetryHistory, lock_history};

/// Shared state accessible to all bridge route handlers.
pub struct BridgeState {
    pub dispatcher: SharedDispatcher,
    pub history: SharedHistory,
    pub static_dir: Option<PathBuf>,
}

/// Body of `POST /command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum CommandRequest {
    Report,
    Switch { port: i32, new_channel: i32 },
    UpdatePort { port: i32, fec_factor: f64 },
    Raw { cmd_id: u32 },
}

/// Payloads of a raw response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub int: Vec<i32>,
    pub char: String,
    pub double: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Report(Vec<ReportEntry>),
    Status { status: i32 },
    Raw(Option<RawPayload>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the axum router with all bridge routes.
pub fn router(state: Arc<BridgeState>) -> axum::Router {
    axum::Router::new()
        .route("/command", post(handle_command))
        .route("/reports", get(handle_reports))
        .route("/health", get(handle_health))
        .fallback(handle_static)
        .with_state(state)
}

/// Serve the bridge on `addr` until the shutdown signal is received.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<BridgeState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP bridge listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP bridge shutting down");
        })
        .await
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_command(
    State(state): State<Arc<BridgeState>>,
    Json(request): Json<CommandRequest>,
) -> Json<CommandResponse> {
    debug!(?request, "Bridge command");
    let mut dispatcher = state.dispatcher.lock().await;
    let response = match request {
        CommandRequest::Report => CommandResponse::Report(dispatcher.report().await),
        CommandRequest::Switch { port, new_channel } => CommandResponse::Status {
            status: dispatcher.switch_channel(port, new_channel).await,
        },
        CommandRequest::UpdatePort { port, fec_factor } => CommandResponse::Status {
            status: dispatcher.update_port(port, fec_factor).await,
        },
        CommandRequest::Raw { cmd_id } => CommandResponse::Raw(
            dispatcher
                .raw(cmd_id, Vec::new(), Vec::new(), Vec::new())
                .await
                .map(|m| RawPayload {
                    char: m.payload_text(),
                    int: m.payload_int,
                    double: m.payload_double,
                }),
        ),
    };
    Json(response)
}

async fn handle_reports(State(state): State<Arc<BridgeState>>) -> Json<TelemetryHistory> {
    Json(lock_history(&state.history).clone())
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Serve a UI file, falling back to `index.html` for client-side routes.
async fn handle_static(State(state): State<Arc<BridgeState>>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let Some(root) = state.static_dir.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(requested) = resolve_static(root, uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let path = match tokio::fs::metadata(&requested).await {
        Ok(meta) if meta.is_file() => requested,
        _ => root.join("index.html"),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Map a request path under `root`, refusing anything that could escape it.
fn resolve_static(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for part in uri_path.split('/').filter(|p| !p.is_empty()) {
        if part == "." || part == ".." || part.contains('\\') {
            return None;
        }
        path.push(part);
    }
    Some(path)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
