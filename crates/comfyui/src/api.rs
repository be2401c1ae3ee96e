//! HTTP side of the ComfyUI protocol.
//!
//! Three endpoints matter to the worker: `GET /` answers once the server
//! has finished booting, `POST /prompt` queues a graph and
//! `GET /history/{prompt_id}` describes what a finished prompt produced.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use vidgen_core::retry::{retry_fixed, RetryError, RetryPolicy};
use vidgen_core::workflow::GraphDocument;

use crate::outputs::HistoryEntry;

/// Probes sent before declaring the server unreachable (three minutes).
pub const READINESS_ATTEMPTS: u32 = 180;

/// Pause between readiness probes.
pub const READINESS_DELAY: Duration = Duration::from_secs(1);

/// Timeout of a single readiness probe.
pub const READINESS_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness probing budget.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(READINESS_ATTEMPTS, READINESS_DELAY),
            request_timeout: READINESS_REQUEST_TIMEOUT,
        }
    }
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct QueuedPrompt {
    pub prompt_id: String,
    /// Queue position assigned by the server.
    #[serde(default)]
    pub number: i64,
    /// Validation complaints for individual nodes, if any.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Errors from the ComfyUI HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The request never got a response (connect, DNS, timeout).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// ComfyUI answered with a non-2xx status.
    #[error("ComfyUI answered {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, kept for the job error message.
        body: String,
    },

    /// Readiness polling used up its attempts.
    #[error("ComfyUI server at {url} unreachable after {attempts} attempts: {last_error}")]
    ServerUnreachable {
        /// Probed URL.
        url: String,
        /// Probes made before giving up.
        attempts: u32,
        /// Failure reported by the final probe.
        last_error: String,
    },

    /// `GET /history/{prompt_id}` returned no entry for the prompt.
    #[error("History has no record of prompt {0}")]
    MissingHistory(String),

    /// The cancellation token fired during readiness polling.
    #[error("Cancelled while talking to ComfyUI")]
    Cancelled,
}

/// HTTP client bound to one ComfyUI server.
pub struct ComfyHttp {
    http: reqwest::Client,
    base_url: String,
}

impl ComfyHttp {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8188`.
    pub fn new(base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One `GET /` with the given timeout.
    pub async fn probe(&self, timeout: Duration) -> Result<(), HttpError> {
        let response = self
            .http
            .get(format!("{}/", self.base_url))
            .timeout(timeout)
            .send()
            .await?;
        expect_success(response).await.map(drop)
    }

    /// Probe until the server answers with a 2xx.
    ///
    /// Returns how many probes it took.
    pub async fn wait_until_ready(
        &self,
        policy: &ReadinessPolicy,
        cancel: &CancellationToken,
    ) -> Result<u32, HttpError> {
        let outcome = retry_fixed(&policy.retry, cancel, "ComfyUI readiness probe", |attempt| {
            let probe = self.probe(policy.request_timeout);
            async move { probe.await.map(|()| attempt) }
        })
        .await;

        match outcome {
            Ok(attempts) => {
                tracing::info!(url = %self.base_url, attempts, "ComfyUI is ready");
                Ok(attempts)
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => Err(HttpError::ServerUnreachable {
                url: self.base_url.clone(),
                attempts,
                last_error: last_error.to_string(),
            }),
            Err(RetryError::Cancelled) => Err(HttpError::Cancelled),
        }
    }

    /// Queue `graph` on behalf of `client_id`. Not retried.
    pub async fn queue_prompt(
        &self,
        graph: &GraphDocument,
        client_id: &str,
    ) -> Result<QueuedPrompt, HttpError> {
        tracing::info!(url = %self.base_url, nodes = graph.len(), "Queueing prompt");

        let response = self
            .http
            .post(format!("{}/prompt", self.base_url))
            .json(&serde_json::json!({ "prompt": graph, "client_id": client_id }))
            .send()
            .await?;
        read_json(response).await
    }

    /// Execution record of `prompt_id`.
    pub async fn history(&self, prompt_id: &str) -> Result<HistoryEntry, HttpError> {
        tracing::info!(url = %self.base_url, prompt_id, "Fetching history");

        let response = self
            .http
            .get(format!("{}/history/{prompt_id}", self.base_url))
            .send()
            .await?;

        let mut records: HashMap<String, HistoryEntry> = read_json(response).await?;
        records
            .remove(prompt_id)
            .ok_or_else(|| HttpError::MissingHistory(prompt_id.to_string()))
    }
}

/// Turn a non-2xx response into [`HttpError::Status`], keeping the body.
async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(text) => text,
        Err(_) => "<unreadable body>".to_string(),
    };
    Err(HttpError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, HttpError> {
    Ok(expect_success(response).await?.json::<T>().await?)
}
