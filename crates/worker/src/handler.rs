//! Job handler: from a job request to a video or an error message.

use std::path::Path;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use vidgen_comfyui::outputs::first_artifact;
use vidgen_comfyui::session::{ComfyUISession, SessionError};
use vidgen_core::error::CoreError;
use vidgen_core::injector::inject;
use vidgen_core::params::{GenerationParams, InputMode, Job};
use vidgen_core::workflow::WorkflowMode;

use crate::config::WorkerConfig;
use crate::input::{InputError, InputResolver};

/// File name of the resolved start image inside the task directory.
pub const INPUT_IMAGE_FILENAME: &str = "input_image.jpg";

/// File name of the resolved end image inside the task directory.
pub const END_IMAGE_FILENAME: &str = "end_image.jpg";

/// Message reported when the workflow finished without a video.
pub const NO_VIDEO_MESSAGE: &str = "no video found";

/// Everything a job needs that outlives it.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub resolver: InputResolver,
    pub session: ComfyUISession,
}

impl WorkerContext {
    /// Context talking to the ComfyUI server named in `config`.
    ///
    /// `client_id` is generated once per process.
    pub fn new(config: WorkerConfig, client_id: String) -> Self {
        let resolver = InputResolver::new(config.download_timeout);
        let session = ComfyUISession::new(&config.server_host, client_id, config.session_config());
        Self::from_parts(config, resolver, session)
    }

    pub fn from_parts(config: WorkerConfig, resolver: InputResolver, session: ComfyUISession) -> Self {
        Self {
            config,
            resolver,
            session,
        }
    }
}

/// What the dispatcher receives for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Video { video: String },
    Error { error: String },
}

impl JobOutput {
    pub fn error(message: impl Into<String>) -> Self {
        JobOutput::Error {
            error: message.into(),
        }
    }
}

/// A failed job. The display text is what the caller sees.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job document {path}: {reason}")]
    InvalidJob { path: String, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Generation(#[from] SessionError),
}

impl JobError {
    pub fn to_output(&self) -> JobOutput {
        JobOutput::error(self.to_string())
    }
}

/// Read a job request from a JSON file.
pub async fn load_job(path: &Path) -> Result<Job, JobError> {
    let invalid = |reason: String| JobError::InvalidJob {
        path: path.display().to_string(),
        reason,
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))
}

/// Run one job to completion.
///
/// Failures before submission (bad parameters, unusable inputs, broken
/// templates) never reach ComfyUI. A workflow that completes without any
/// video yields [`JobOutput::Error`] rather than an `Err`.
pub async fn handle_job(
    ctx: &WorkerContext,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<JobOutput, JobError> {
    let span = tracing::info_span!("job", job_id = job.id.as_deref().unwrap_or("-"));
    run_job(ctx, job, cancel).instrument(span).await
}

async fn run_job(
    ctx: &WorkerContext,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<JobOutput, JobError> {
    let input = &job.input;
    let params = GenerationParams::from_input(input)?;

    let task_dir = ctx.config.work_dir.join(format!("task_{}", Uuid::new_v4()));

    let image_path = match input.image_source() {
        Some((mode, value)) => {
            resolve_image(ctx, value, &task_dir, INPUT_IMAGE_FILENAME, mode, cancel).await?
        }
        None => {
            tracing::info!(path = %ctx.config.default_image_path, "No input image, using default");
            ctx.config.default_image_path.clone()
        }
    };

    let end_image_path = match input.end_image_source() {
        Some((mode, value)) => {
            Some(resolve_image(ctx, value, &task_dir, END_IMAGE_FILENAME, mode, cancel).await?)
        }
        None => None,
    };

    let mode = WorkflowMode::select(end_image_path.is_some());
    tracing::info!(
        mode = mode.label(),
        template = %ctx.config.templates.path_for(mode).display(),
        "Loading workflow template",
    );
    let mut workflow = ctx.config.templates.load(mode)?;

    let report = inject(&mut workflow, &params, &image_path, end_image_path.as_deref())?;
    tracing::info!(
        mode = mode.label(),
        length = params.length,
        steps = params.steps,
        split = ?report.split_steps,
        cfg = params.cfg,
        fps = params.fps,
        seed = %params.seed,
        width = report.width,
        height = report.height,
        loras = params.lora_pairs.len(),
        skipped_patches = report.skipped.len(),
        "Workflow parameters applied",
    );

    let result = ctx.session.generate(&workflow, cancel).await?;

    match first_artifact(&result.artifacts) {
        Some(video) => {
            tracing::info!(prompt_id = %result.prompt_id, encoded_len = video.len(), "Job produced a video");
            Ok(JobOutput::Video {
                video: video.to_string(),
            })
        }
        None => {
            tracing::warn!(prompt_id = %result.prompt_id, "Workflow finished without a video");
            Ok(JobOutput::error(NO_VIDEO_MESSAGE))
        }
    }
}

async fn resolve_image(
    ctx: &WorkerContext,
    value: &str,
    task_dir: &Path,
    filename: &str,
    mode: InputMode,
    cancel: &CancellationToken,
) -> Result<String, JobError> {
    tracing::debug!(mode = mode.as_str(), filename, "Resolving image input");
    Ok(ctx
        .resolver
        .resolve(value, task_dir, filename, mode, cancel)
        .await?)
}
