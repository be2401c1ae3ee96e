#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use vidgen_comfyui::api::ReadinessPolicy;
use vidgen_comfyui::session::{ComfyUISession, SessionConfig};
use vidgen_core::retry::RetryPolicy;
use vidgen_core::workflow::GraphDocument;

/// Prompt id the fake server assigns to every submission.
pub const PROMPT_ID: &str = "prompt-1";

/// Scripted state behind the fake ComfyUI server.
#[derive(Default)]
pub struct FakeComfy {
    /// Number of `GET /` probes answered with 503 before reporting ready.
    pub unready_pings: AtomicU32,
    /// Total `GET /` probes received.
    pub pings: AtomicU32,
    /// Status returned by `POST /prompt` instead of queueing.
    pub reject_submit: Mutex<Option<StatusCode>>,
    /// Bodies received on `POST /prompt`.
    pub submissions: Mutex<Vec<Value>>,
    /// Record returned under [`PROMPT_ID`] by `GET /history/{id}`.
    pub history: Mutex<Value>,
    /// When false the completion event is never pushed.
    pub never_complete: AtomicBool,
}

impl FakeComfy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(json!({"outputs": {}, "status": {"completed": true}})),
            ..Default::default()
        })
    }

    pub fn always_unready() -> Arc<Self> {
        let fake = Self::new();
        fake.unready_pings.store(u32::MAX, Ordering::SeqCst);
        fake
    }

    pub fn set_history(&self, record: Value) {
        *self.history.lock().unwrap() = record;
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }
}

async fn root(State(fake): State<Arc<FakeComfy>>) -> StatusCode {
    let seen = fake.pings.fetch_add(1, Ordering::SeqCst);
    if seen < fake.unready_pings.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn prompt(State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>) -> Response {
    if let Some(status) = *fake.reject_submit.lock().unwrap() {
        return (status, r#"{"error":"invalid prompt"}"#).into_response();
    }
    fake.submissions.lock().unwrap().push(body);
    Json(json!({"prompt_id": PROMPT_ID, "number": 7, "node_errors": {}})).into_response()
}

async fn history(State(fake): State<Arc<FakeComfy>>, Path(prompt_id): Path<String>) -> Json<Value> {
    if prompt_id != PROMPT_ID {
        return Json(json!({}));
    }
    let record = fake.history.lock().unwrap().clone();
    Json(json!({ PROMPT_ID: record }))
}

async fn ws(State(fake): State<Arc<FakeComfy>>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| push_events(socket, fake))
}

async fn push_events(mut socket: WebSocket, fake: Arc<FakeComfy>) {
    let status = json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 0}}, "sid": "fake"}});
    if socket.send(Message::Text(status.to_string().into())).await.is_err() {
        return;
    }

    // Events only flow once something has been queued.
    while fake.submissions.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let frames = vec![
        Message::Binary(vec![0, 0, 0, 1, 0xff].into()),
        Message::Text(json!({"type": "executing", "data": {"node": null, "prompt_id": "someone-else"}}).to_string().into()),
        Message::Text(json!({"type": "execution_start", "data": {"prompt_id": PROMPT_ID}}).to_string().into()),
        Message::Text(json!({"type": "progress", "data": {"value": 3, "max": 6, "prompt_id": PROMPT_ID, "node": "540"}}).to_string().into()),
    ];
    for frame in frames {
        if socket.send(frame).await.is_err() {
            return;
        }
    }

    if !fake.never_complete.load(Ordering::SeqCst) {
        let done = json!({"type": "executing", "data": {"node": null, "prompt_id": PROMPT_ID}});
        if socket.send(Message::Text(done.to_string().into())).await.is_err() {
            return;
        }
    }

    // Hold the channel open until the client hangs up.
    while let Some(Ok(_)) = socket.recv().await {}
}

pub fn router(fake: Arc<FakeComfy>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/prompt", post(prompt))
        .route("/history/{prompt_id}", get(history))
        .route("/ws", get(ws))
        .with_state(fake)
}

/// Serve `fake` on an ephemeral local port.
pub async fn spawn(fake: Arc<FakeComfy>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(fake)).await.unwrap();
    });
    addr
}

/// Tight retry budgets so failure paths finish quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        readiness: ReadinessPolicy {
            retry: RetryPolicy::new(5, Duration::from_millis(10)),
            request_timeout: Duration::from_secs(1),
        },
        channel: RetryPolicy::new(3, Duration::from_millis(10)),
        completion_timeout: Some(Duration::from_secs(5)),
        output_dir: None,
    }
}

pub fn session_for(addr: SocketAddr, config: SessionConfig) -> ComfyUISession {
    ComfyUISession::with_urls(
        format!("http://{addr}"),
        format!("ws://{addr}"),
        "test-client".to_string(),
        config,
    )
}

/// Minimal two-node graph.
pub fn small_workflow() -> GraphDocument {
    GraphDocument::from_json_str(
        r#"{
            "135": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat"}},
            "131": {"class_type": "VHS_VideoCombine", "inputs": {"frame_rate": 16}}
        }"#,
    )
    .unwrap()
}
