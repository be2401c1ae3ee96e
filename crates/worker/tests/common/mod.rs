#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use vidgen_comfyui::api::ReadinessPolicy;
use vidgen_comfyui::session::{ComfyUISession, SessionConfig};
use vidgen_core::params::Job;
use vidgen_core::retry::RetryPolicy;
use vidgen_worker::config::WorkerConfig;
use vidgen_worker::handler::WorkerContext;
use vidgen_worker::input::InputResolver;

pub const PROMPT_ID: &str = "job-prompt";

/// Bytes served at `/files/image.png` and `/files/flaky.png`.
pub const IMAGE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image";

/// Bytes of the video the fake server reports in history.
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42";

/// Fake ComfyUI plus a small file host for URL inputs.
#[derive(Default)]
pub struct FakeServer {
    pub unready: std::sync::atomic::AtomicBool,
    pub submissions: Mutex<Vec<Value>>,
    pub history: Mutex<Value>,
    /// `/files/flaky.png` answers 503 this many times before serving.
    pub flaky_failures: AtomicU32,
    pub file_hits: AtomicU32,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(json!({"outputs": {}})),
            ..Default::default()
        })
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.submissions.lock().unwrap().clone()
    }

    /// The single prompt graph submitted so far.
    pub fn submitted_prompt(&self) -> Value {
        let submissions = self.submissions();
        assert_eq!(submissions.len(), 1, "expected exactly one submission");
        submissions[0]["prompt"].clone()
    }

    pub fn file_hits(&self) -> u32 {
        self.file_hits.load(Ordering::SeqCst)
    }

    /// Report `video` as the output of node `131`.
    pub fn produce_video(&self, video: &Path) {
        *self.history.lock().unwrap() = json!({
            "outputs": {
                "131": {"gifs": [{"filename": "wan_00001.mp4", "subfolder": "", "type": "output", "fullpath": video}]}
            },
            "status": {"status_str": "success", "completed": true}
        });
    }
}

async fn root(State(fake): State<Arc<FakeServer>>) -> StatusCode {
    if fake.unready.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn prompt(State(fake): State<Arc<FakeServer>>, Json(body): Json<Value>) -> Json<Value> {
    fake.submissions.lock().unwrap().push(body);
    Json(json!({"prompt_id": PROMPT_ID, "number": 1, "node_errors": {}}))
}

async fn history(State(fake): State<Arc<FakeServer>>, UrlPath(id): UrlPath<String>) -> Json<Value> {
    let record = fake.history.lock().unwrap().clone();
    if id == PROMPT_ID {
        Json(json!({ PROMPT_ID: record }))
    } else {
        Json(json!({}))
    }
}

async fn ws(State(fake): State<Arc<FakeServer>>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| push_events(socket, fake))
}

async fn push_events(mut socket: WebSocket, fake: Arc<FakeServer>) {
    while fake.submissions.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let events = [
        json!({"type": "execution_start", "data": {"prompt_id": PROMPT_ID}}),
        json!({"type": "executing", "data": {"node": "540", "prompt_id": PROMPT_ID}}),
        json!({"type": "executing", "data": {"node": null, "prompt_id": PROMPT_ID}}),
    ];
    for event in events {
        if socket.send(Message::Text(event.to_string().into())).await.is_err() {
            return;
        }
    }

    while let Some(Ok(_)) = socket.recv().await {}
}

async fn file(State(fake): State<Arc<FakeServer>>, UrlPath(name): UrlPath<String>) -> Response {
    fake.file_hits.fetch_add(1, Ordering::SeqCst);
    match name.as_str() {
        "image.png" => IMAGE_BYTES.into_response(),
        "flaky.png" => {
            let remaining = fake.flaky_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                fake.flaky_failures.store(remaining - 1, Ordering::SeqCst);
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            } else {
                IMAGE_BYTES.into_response()
            }
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn spawn(fake: Arc<FakeServer>) -> SocketAddr {
    let app = Router::new()
        .route("/", get(root))
        .route("/prompt", post(prompt))
        .route("/history/{prompt_id}", get(history))
        .route("/ws", get(ws))
        .route("/files/{name}", get(file))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Workflow graph with every node the injector knows about.
pub fn workflow_json(variant: &str, with_end_image: bool) -> Value {
    let mut graph = json!({
        "244": {"class_type": "LoadImage", "inputs": {"image": "example.png"}},
        "541": {"class_type": "WanVideoImageToVideoEncode", "inputs": {"num_frames": 81, "force_offload": true}},
        "135": {"class_type": "WanVideoTextEncode", "inputs": {"positive_prompt": "", "negative_prompt": "", "force_offload": true}},
        "220": {"class_type": "WanVideoSampler", "inputs": {"seed": 0, "force_offload": true}},
        "540": {"class_type": "WanVideoSampler", "inputs": {"seed": 0, "cfg": 1.0, "force_offload": true}},
        "235": {"class_type": "INTConstant", "inputs": {"value": 512}},
        "236": {"class_type": "INTConstant", "inputs": {"value": 512}},
        "498": {"class_type": "WanVideoContextOptions", "inputs": {"context_frames": 81, "context_overlap": 16}},
        "569": {"class_type": "INTConstant", "inputs": {"value": 4}},
        "575": {"class_type": "INTConstant", "inputs": {"value": 2}},
        "570": {"class_type": "CreateCFGScheduleFloatList", "inputs": {"cfg_scale_start": 1.0, "cfg_scale_end": 1.0}},
        "131": {"class_type": "VHS_VideoCombine", "inputs": {"frame_rate": 24, "filename_prefix": variant}},
        "279": {"class_type": "WanVideoLoraSelectMulti", "inputs": {"lora_0": "none"}},
        "553": {"class_type": "WanVideoLoraSelectMulti", "inputs": {"lora_0": "none"}}
    });
    if with_end_image {
        graph["617"] = json!({"class_type": "LoadImage", "inputs": {"image": "end.png"}});
    }
    graph
}

/// A worker wired to `addr` with templates and scratch space under `root`.
pub fn context_for(addr: SocketAddr, root: &Path) -> WorkerContext {
    let single = root.join("single.json");
    let flf2v = root.join("flf2v.json");
    std::fs::write(&single, workflow_json("single", false).to_string()).unwrap();
    std::fs::write(&flf2v, workflow_json("flf2v", true).to_string()).unwrap();
    context_with_templates(addr, root, &single, &flf2v)
}

pub fn context_with_templates(
    addr: SocketAddr,
    root: &Path,
    single: &Path,
    flf2v: &Path,
) -> WorkerContext {
    let work_dir = root.join("work");
    let vars: Vec<(&str, String)> = vec![
        ("WORKFLOW_SINGLE_PATH", single.display().to_string()),
        ("WORKFLOW_FLF2V_PATH", flf2v.display().to_string()),
        ("WORK_DIR", work_dir.display().to_string()),
        ("COMPLETION_TIMEOUT_SECS", "10".to_string()),
    ];
    let config = WorkerConfig::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    });

    let session = ComfyUISession::with_urls(
        format!("http://{addr}"),
        format!("ws://{addr}"),
        "worker-test".to_string(),
        SessionConfig {
            readiness: ReadinessPolicy {
                retry: RetryPolicy::new(3, Duration::from_millis(10)),
                request_timeout: Duration::from_secs(1),
            },
            channel: RetryPolicy::new(3, Duration::from_millis(10)),
            ..config.session_config()
        },
    );
    let resolver = InputResolver::with_policy(
        reqwest::Client::new(),
        RetryPolicy::new(4, Duration::from_millis(10)),
        Duration::from_secs(2),
    );

    WorkerContext::from_parts(config, resolver, session)
}

pub fn job(input: Value) -> Job {
    serde_json::from_value(json!({"id": "test-job", "input": input})).unwrap()
}

/// Write the video the fake server points history at.
pub fn write_video(root: &Path) -> PathBuf {
    let path = root.join("wan_00001.mp4");
    std::fs::write(&path, VIDEO_BYTES).unwrap();
    path
}
