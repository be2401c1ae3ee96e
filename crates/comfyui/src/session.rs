//! One generation round-trip against a ComfyUI server.
//!
//! [`ComfyUISession`] waits for the server to answer, opens the push
//! channel, submits the patched workflow, waits for the completion event
//! and collects the produced videos from history.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vidgen_core::retry::RetryPolicy;
use vidgen_core::workflow::GraphDocument;

use crate::api::{ComfyHttp, HttpError, ReadinessPolicy};
use crate::client::{ChannelError, PushChannel};
use crate::outputs::{collect_artifacts, NodeArtifacts, OutputError};
use crate::processor::wait_for_completion;
use crate::reconnect::{default_channel_policy, open_with_retry};

/// Port ComfyUI listens on.
pub const COMFYUI_PORT: u16 = 8188;

/// Timeouts and retry budgets for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub readiness: ReadinessPolicy,
    pub channel: RetryPolicy,
    /// Upper bound on the completion wait; `None` waits indefinitely.
    pub completion_timeout: Option<Duration>,
    /// ComfyUI output directory, used when history omits `fullpath`.
    pub output_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessPolicy::default(),
            channel: default_channel_policy(),
            completion_timeout: None,
            output_dir: None,
        }
    }
}

/// Outcome of a completed prompt.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub prompt_id: String,
    pub artifacts: NodeArtifacts,
}

/// Errors from a generation round-trip.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Client for one ComfyUI server, shared by every job of the process.
pub struct ComfyUISession {
    http: ComfyHttp,
    channel: PushChannel,
    config: SessionConfig,
}

impl ComfyUISession {
    /// Session against `host` on [`COMFYUI_PORT`].
    pub fn new(host: &str, client_id: String, config: SessionConfig) -> Self {
        Self::with_urls(
            format!("http://{host}:{COMFYUI_PORT}"),
            format!("ws://{host}:{COMFYUI_PORT}"),
            client_id,
            config,
        )
    }

    /// Session with explicit HTTP and WebSocket base URLs.
    pub fn with_urls(
        api_url: String,
        ws_url: String,
        client_id: String,
        config: SessionConfig,
    ) -> Self {
        Self {
            http: ComfyHttp::new(api_url),
            channel: PushChannel::new(ws_url, client_id),
            config,
        }
    }

    pub fn client_id(&self) -> &str {
        self.channel.client_id()
    }

    pub fn http(&self) -> &ComfyHttp {
        &self.http
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run `workflow` to completion and collect its videos.
    ///
    /// Nothing is submitted unless the server passed the readiness check
    /// and the push channel is open.
    pub async fn generate(
        &self,
        workflow: &GraphDocument,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, SessionError> {
        self.http
            .wait_until_ready(&self.config.readiness, cancel)
            .await?;

        let mut channel = open_with_retry(&self.channel, &self.config.channel, cancel).await?;

        let queued = match self.http.queue_prompt(workflow, &channel.client_id).await {
            Ok(queued) => queued,
            Err(e) => {
                if let Err(close_err) = channel.socket.close(None).await {
                    tracing::debug!(error = %close_err, "WebSocket close failed");
                }
                return Err(e.into());
            }
        };

        if queued.node_errors.as_object().is_some_and(|errors| !errors.is_empty()) {
            tracing::warn!(node_errors = %queued.node_errors, "ComfyUI queued the prompt with node errors");
        }

        let prompt_id = queued.prompt_id;
        tracing::info!(
            prompt_id = %prompt_id,
            queue_number = queued.number,
            "Workflow submitted to ComfyUI",
        );

        let waited = wait_for_completion(
            &mut channel.socket,
            &prompt_id,
            self.config.completion_timeout,
            cancel,
        )
        .await;

        if let Err(e) = channel.socket.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
        waited?;

        let entry = self.http.history(&prompt_id).await?;
        let artifacts = collect_artifacts(&entry, self.config.output_dir.as_deref()).await?;

        Ok(GenerationResult {
            prompt_id,
            artifacts,
        })
    }
}
