//! Development sink for geocell agents.
//!
//! An append-only, key-addressable store speaking a realtime-database style
//! push protocol: `POST /{root}/{agent}.json` stores one sample under a fresh
//! key and answers `{"name": key}`; `GET` on the same path lists the agent's
//! samples in insertion order. Payloads that fail schema validation are
//! answered with 400. In reject mode every push gets 503.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use geocell_core::validate_payload;

/// Shared sink state.
#[derive(Default)]
pub struct SinkState {
    records: Mutex<HashMap<String, Vec<(String, Value)>>>,
    reject: AtomicBool,
}

impl SinkState {
    pub fn new(reject: bool) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            reject: AtomicBool::new(reject),
        })
    }

    /// Toggle fault-drill mode.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Samples stored under `path` (e.g. `geocelltrack/tracker/agent-1`).
    pub async fn samples(&self, path: &str) -> Vec<Value> {
        self.records
            .lock()
            .await
            .get(path)
            .map(|v| v.iter().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn total(&self) -> usize {
        self.records.lock().await.values().map(Vec::len).sum()
    }
}

#[derive(Serialize)]
struct PushResponse {
    name: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type Reply<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn fail(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: msg.into() }))
}

/// `agent.json` → `agent`; anything else is not a data path.
fn data_key(path: &str) -> Option<String> {
    let trimmed = path.trim_matches('/');
    let stem = trimmed.strip_suffix(".json")?;
    if stem.is_empty() || stem.ends_with('/') {
        return None;
    }
    Some(stem.to_string())
}

async fn handle_push(
    State(state): State<Arc<SinkState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Reply<PushResponse> {
    let key = data_key(&path).ok_or_else(|| fail(StatusCode::NOT_FOUND, "not a .json data path"))?;
    if state.reject.load(Ordering::SeqCst) {
        warn!("rejecting push to {key} (reject mode)");
        return Err(fail(StatusCode::SERVICE_UNAVAILABLE, "sink is rejecting writes"));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| fail(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")))?;
    if let Err(violations) = validate_payload(&payload) {
        warn!("invalid sample for {key}: {}", violations.join("; "));
        return Err(fail(StatusCode::BAD_REQUEST, violations.join("; ")));
    }

    let name = uuid::Uuid::new_v4().to_string();
    let mut records = state.records.lock().await;
    let entries = records.entry(key.clone()).or_default();
    entries.push((name.clone(), payload));
    debug!("stored {key}/{name} ({} samples)", entries.len());
    Ok(Json(PushResponse { name }))
}

async fn handle_list(
    State(state): State<Arc<SinkState>>,
    Path(path): Path<String>,
) -> Reply<Value> {
    let key = data_key(&path).ok_or_else(|| fail(StatusCode::NOT_FOUND, "not a .json data path"))?;
    let records = state.records.lock().await;
    let Some(entries) = records.get(&key) else {
        return Ok(Json(Value::Null));
    };
    let listing: Map<String, Value> = entries.iter().cloned().collect();
    Ok(Json(Value::Object(listing)))
}

async fn handle_health(State(state): State<Arc<SinkState>>) -> Json<Value> {
    let records = state.records.lock().await;
    Json(json!({
        "status": if state.reject.load(Ordering::SeqCst) { "rejecting" } else { "ok" },
        "paths": records.len(),
        "samples": records.values().map(Vec::len).sum::<usize>(),
    }))
}

async fn handle_index() -> Json<Value> {
    Json(json!({
        "name": "GeoCellTrack Sink",
        "version": geocell_core::VERSION,
        "endpoints": {
            "/": "This API index",
            "/{root}/{agent}.json": {
                "POST": "Append one sample; answers {\"name\": key}",
                "GET": "List the agent's samples in insertion order",
            },
            "/health": "Health check",
        },
        "example": "/geocelltrack/tracker/agent-1.json",
    }))
}

/// Build the axum router over `state`.
pub fn build_router(state: Arc<SinkState>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/{*path}", get(handle_list).post(handle_push))
        .with_state(state)
}

/// Serve on an already-bound listener.
pub async fn serve(listener: TcpListener, state: Arc<SinkState>) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

/// Bind `host:port` and run the sink until the process exits.
pub async fn run_server(host: &str, port: u16, reject: bool) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "sink listening on http://{}{}",
        listener.local_addr()?,
        if reject { " (reject mode)" } else { "" }
    );
    serve(listener, SinkState::new(reject)).await
}
