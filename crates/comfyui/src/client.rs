//! ComfyUI push channel (`/ws?clientId=...`).
//!
//! ComfyUI reports execution events only to the WebSocket whose
//! `clientId` matches the one a prompt was queued with, so the channel is
//! opened before submission and uses the process-wide client id.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ChannelSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Where to open the push channel and under which client id.
pub struct PushChannel {
    ws_url: String,
    client_id: String,
}

/// An open push channel.
pub struct OpenChannel {
    pub client_id: String,
    pub socket: ChannelSocket,
}

/// Errors on the push channel, from handshake to completion.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A single handshake attempt failed.
    #[error("WebSocket handshake with {url} failed: {reason}")]
    Handshake {
        /// Endpoint including the `clientId` query.
        url: String,
        /// Handshake failure as reported by tungstenite.
        reason: String,
    },

    /// Every handshake attempt in the retry budget failed.
    #[error("WebSocket connection to {url} failed after {attempts} attempts: {last_error}")]
    ConnectExhausted {
        /// Endpoint including the `clientId` query.
        url: String,
        /// Handshakes attempted.
        attempts: u32,
        /// Failure of the final attempt.
        last_error: String,
    },

    /// Protocol or I/O error on an open channel.
    #[error("WebSocket error: {0}")]
    Transport(String),

    /// The server closed the channel before the prompt finished. Holds the
    /// prompt id.
    #[error("WebSocket closed before prompt {0} completed")]
    ClosedEarly(String),

    /// The completion deadline passed.
    #[error("Prompt {prompt_id} did not complete within {timeout_secs}s")]
    GenerationTimeout {
        /// Prompt that was being waited on.
        prompt_id: String,
        /// Configured deadline in seconds.
        timeout_secs: u64,
    },

    /// The cancellation token fired while connecting or waiting.
    #[error("Cancelled while waiting on ComfyUI")]
    Cancelled,
}

impl PushChannel {
    /// `ws_url` is the server root, e.g. `ws://127.0.0.1:8188`.
    pub fn new(ws_url: String, client_id: String) -> Self {
        Self { ws_url, client_id }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> String {
        format!("{}/ws?clientId={}", self.ws_url, self.client_id)
    }

    /// Single handshake attempt.
    pub async fn open(&self) -> Result<OpenChannel, ChannelError> {
        let url = self.endpoint();
        let (socket, _) = connect_async(&url)
            .await
            .map_err(|e| ChannelError::Handshake {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(client_id = %self.client_id, url = %url, "Push channel open");
        Ok(OpenChannel {
            client_id: self.client_id.clone(),
            socket,
        })
    }
}
