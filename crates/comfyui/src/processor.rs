//! Completion wait on the push channel.
//!
//! Frames are consumed until ComfyUI reports our prompt finished
//! (`executing` with a `null` node and our `prompt_id`). Everything else is
//! logged and skipped. An `execution_error` is logged but does not end the
//! wait; ComfyUI still sends the final `executing` for a failed prompt.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::client::ChannelError;
use crate::messages::PushEvent;

/// Read `frames` until `prompt_id` completes.
///
/// `deadline` bounds the wait with [`ChannelError::GenerationTimeout`];
/// `None` waits as long as the channel stays open. `cancel` interrupts
/// either way.
pub async fn wait_for_completion<S>(
    frames: &mut S,
    prompt_id: &str,
    deadline: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<(), ChannelError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let bounded = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, drain_until_done(frames, prompt_id))
                .await
                .unwrap_or_else(|_| {
                    Err(ChannelError::GenerationTimeout {
                        prompt_id: prompt_id.to_string(),
                        timeout_secs: limit.as_secs(),
                    })
                }),
            None => drain_until_done(frames, prompt_id).await,
        }
    };

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(ChannelError::Cancelled),
        outcome = bounded => outcome,
    };

    if let Err(e) = &outcome {
        tracing::error!(prompt_id, error = %e, "Gave up waiting for prompt");
    }
    outcome
}

async fn drain_until_done<S>(frames: &mut S, prompt_id: &str) -> Result<(), ChannelError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame.map_err(|e| ChannelError::Transport(e.to_string()))? {
            Message::Text(text) => {
                if observe(&text, prompt_id) {
                    return Ok(());
                }
            }
            Message::Close(frame) => {
                tracing::warn!(prompt_id, ?frame, "ComfyUI closed the push channel");
                return Err(ChannelError::ClosedEarly(prompt_id.to_string()));
            }
            // Binary frames carry latent previews.
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    Err(ChannelError::ClosedEarly(prompt_id.to_string()))
}

/// Log one text frame; `true` once it marks `prompt_id` as finished.
fn observe(text: &str, prompt_id: &str) -> bool {
    let event = match PushEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, frame = %text, "Undecodable push event");
            return false;
        }
    };

    match event {
        PushEvent::Executing(executing) if executing.finishes(prompt_id) => {
            tracing::info!(prompt_id, "Prompt finished");
            return true;
        }
        PushEvent::Executing(executing) => {
            tracing::debug!(prompt = ?executing.prompt_id, node = ?executing.node, "Executing node");
        }
        PushEvent::Progress(progress) => {
            tracing::info!(
                node = ?progress.node,
                step = progress.value,
                of = progress.max,
                percent = progress.percent(),
                "Sampling progress",
            );
        }
        PushEvent::Started { prompt_id } => {
            tracing::info!(prompt_id = %prompt_id, "Execution started");
        }
        PushEvent::Cached { prompt_id, nodes } => {
            tracing::debug!(prompt_id = %prompt_id, cached_nodes = nodes.len(), "Cached nodes skipped");
        }
        PushEvent::NodeOutput { prompt_id, node } => {
            tracing::debug!(prompt_id = %prompt_id, node = %node, "Node produced output");
        }
        PushEvent::Failed(failure) => {
            tracing::error!(
                prompt_id = %failure.prompt_id,
                node = ?failure.node_id,
                node_type = ?failure.node_type,
                exception = %failure.exception_type,
                message = %failure.exception_message,
                "ComfyUI reported an execution error",
            );
        }
        PushEvent::QueueStatus { remaining } => {
            tracing::debug!(queue_remaining = remaining, "Queue status");
        }
        PushEvent::Unrecognized(kind) => {
            tracing::trace!(kind = %kind, "Ignoring push event");
        }
    }
    false
}
