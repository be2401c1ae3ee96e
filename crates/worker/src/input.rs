//! Materialize job images as local files.
//!
//! An image arrives as a filesystem path, a URL or inline base64. ComfyUI's
//! `LoadImage` node only takes paths, so URLs are downloaded and base64 is
//! decoded into the job's working directory first.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use vidgen_core::params::InputMode;
use vidgen_core::retry::{retry_fixed_if, RetryError, RetryPolicy};

/// Retries after the first download attempt.
pub const DOWNLOAD_RETRIES: u32 = 3;

/// Delay between download attempts.
pub const DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Standard alphabet, accepting input with or without padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors while materializing an input image.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Invalid base64 input: {0}")]
    Decode(String),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input resolution cancelled")]
    Cancelled,
}

/// Why a single download attempt failed.
#[derive(Debug)]
enum FetchError {
    Transport(reqwest::Error),
    Status(StatusCode),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(status) => matches!(
                *status,
                StatusCode::REQUEST_TIMEOUT
                    | StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "{e}"),
            FetchError::Status(status) => write!(f, "HTTP {status}"),
        }
    }
}

/// Turns declared inputs into local file paths.
pub struct InputResolver {
    http: reqwest::Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl InputResolver {
    /// Resolver with the default download retry policy and a per-attempt
    /// `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self::with_policy(
            reqwest::Client::new(),
            RetryPolicy::new(DOWNLOAD_RETRIES + 1, DOWNLOAD_RETRY_DELAY),
            timeout,
        )
    }

    pub fn with_policy(http: reqwest::Client, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            http,
            retry,
            timeout,
        }
    }

    /// Resolve `value` according to `mode`.
    ///
    /// Paths are returned unchanged and never checked for existence. URL
    /// and base64 inputs are written to `work_dir/filename` (creating
    /// `work_dir`) and the absolute path of that file is returned.
    pub async fn resolve(
        &self,
        value: &str,
        work_dir: &Path,
        filename: &str,
        mode: InputMode,
        cancel: &CancellationToken,
    ) -> Result<String, InputError> {
        match mode {
            InputMode::Path => {
                tracing::info!(path = %value, "Using image path as given");
                Ok(value.to_string())
            }
            InputMode::Url => {
                tracing::info!(url = %value, "Downloading input image");
                let bytes = self.download(value, cancel).await?;
                write_input(work_dir, filename, &bytes).await
            }
            InputMode::Base64 => {
                tracing::info!(encoded_len = value.len(), "Decoding base64 input image");
                let bytes = decode_base64(value)?;
                write_input(work_dir, filename, &bytes).await
            }
        }
    }

    async fn download(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, InputError> {
        let result = retry_fixed_if(
            &self.retry,
            cancel,
            "Image download",
            FetchError::is_transient,
            |_| self.fetch_once(url),
        )
        .await;

        match result {
            Ok(bytes) => Ok(bytes),
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => Err(InputError::Download {
                url: url.to_string(),
                reason: format!("{last_error} (after {attempts} attempt(s))"),
            }),
            Err(RetryError::Cancelled) => Err(InputError::Cancelled),
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await.map_err(FetchError::Transport)?;
        Ok(body.to_vec())
    }
}

/// Decode inline image data.
///
/// Whitespace anywhere in the payload and a `data:<mime>;base64,` prefix
/// are ignored.
pub fn decode_base64(raw: &str) -> Result<Vec<u8>, InputError> {
    let trimmed = raw.trim();
    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| InputError::Decode("data URI has no payload".into()))?,
        None => trimmed,
    };

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(InputError::Decode("empty payload".into()));
    }

    LENIENT_BASE64
        .decode(compact.as_bytes())
        .map_err(|e| InputError::Decode(e.to_string()))
}

async fn write_input(work_dir: &Path, filename: &str, bytes: &[u8]) -> Result<String, InputError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| InputError::Io { path, source }
    };

    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(io_err(work_dir))?;

    let path = std::path::absolute(work_dir.join(filename)).map_err(io_err(work_dir))?;
    tokio::fs::write(&path, bytes).await.map_err(io_err(&path))?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "Input image written");
    Ok(path.to_string_lossy().into_owned())
}
