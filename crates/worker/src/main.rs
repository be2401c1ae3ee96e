//! `vidgen-worker` -- runs one Wan2.2 video job against a local ComfyUI.
//!
//! Reads the job document named by the first argument (or
//! `JOB_INPUT_PATH`), runs it and prints `{"video": ...}` or
//! `{"error": ...}` to stdout. Logs go to stderr. See
//! [`vidgen_worker::config::WorkerConfig::from_env`] for the environment
//! variables; `LOG_FORMAT=json` switches to JSON logs.

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use vidgen_worker::config::{LogFormat, WorkerConfig};
use vidgen_worker::handler::{handle_job, load_job, JobOutput, WorkerContext};

const DEFAULT_LOG_FILTER: &str = "vidgen_worker=info,vidgen_comfyui=info,vidgen_core=info";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let json_logs = LogFormat::from_env() == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json_logs.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let mut config = WorkerConfig::from_env();
    if let Some(path) = std::env::args().nth(1) {
        config.job_input_path = path.into();
    }

    // One id per process so ComfyUI routes every job's events to us.
    let client_id = Uuid::new_v4().to_string();

    tracing::info!(
        server = %config.server_host,
        client_id = %client_id,
        job = %config.job_input_path.display(),
        "Starting vidgen-worker",
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Shutdown signal received, cancelling job");
            shutdown.cancel();
        }
    });

    let (output, code) = match load_job(&config.job_input_path).await {
        Ok(job) => {
            let ctx = WorkerContext::new(config, client_id);
            match handle_job(&ctx, &job, &cancel).await {
                Ok(output) => (output, ExitCode::SUCCESS),
                Err(e) => {
                    tracing::error!(error = %e, "Job failed");
                    (e.to_output(), ExitCode::FAILURE)
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not read job");
            (e.to_output(), ExitCode::FAILURE)
        }
    };

    emit(&output);
    code
}

fn emit(output: &JobOutput) {
    match serde_json::to_string(output) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize job output"),
    }
}
