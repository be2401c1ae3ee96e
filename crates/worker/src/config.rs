use std::path::PathBuf;
use std::time::Duration;

use vidgen_comfyui::session::SessionConfig;
use vidgen_core::workflow::WorkflowTemplates;

const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
const DEFAULT_SINGLE_WORKFLOW: &str = "/new_Wan22_api.json";
const DEFAULT_FLF2V_WORKFLOW: &str = "/new_Wan22_flf2v_api.json";
const DEFAULT_IMAGE_PATH: &str = "/example_image.png";
const DEFAULT_JOB_INPUT_PATH: &str = "test_input.json";
const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Worker configuration loaded from environment variables.
///
/// Every field has a default matching the stock container image layout.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sanitized ComfyUI host (default: `127.0.0.1`).
    pub server_host: String,
    /// Workflow template locations.
    pub templates: WorkflowTemplates,
    /// Start image used when a job supplies none.
    pub default_image_path: String,
    /// Parent of the per-job `task_{uuid}` directories (default: `.`).
    pub work_dir: PathBuf,
    /// ComfyUI output directory, for history records without `fullpath`.
    pub comfyui_output_dir: Option<PathBuf>,
    /// Completion wait bound; `None` when `COMPLETION_TIMEOUT_SECS=0`.
    pub completion_timeout: Option<Duration>,
    /// Per-attempt timeout for URL inputs.
    pub download_timeout: Duration,
    /// Job document read by the binary.
    pub job_input_path: PathBuf,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                      |
    /// |---------------------------|------------------------------|
    /// | `SERVER_ADDRESS`          | `127.0.0.1`                  |
    /// | `WORKFLOW_SINGLE_PATH`    | `/new_Wan22_api.json`        |
    /// | `WORKFLOW_FLF2V_PATH`     | `/new_Wan22_flf2v_api.json`  |
    /// | `DEFAULT_IMAGE_PATH`      | `/example_image.png`         |
    /// | `WORK_DIR`                | `.`                          |
    /// | `COMFYUI_OUTPUT_DIR`      | unset                        |
    /// | `COMPLETION_TIMEOUT_SECS` | `3600` (`0` = no limit)      |
    /// | `DOWNLOAD_TIMEOUT_SECS`   | `300`                        |
    /// | `JOB_INPUT_PATH`          | `test_input.json`            |
    ///
    /// Unparseable numbers fall back to their defaults with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server_host = sanitize_server_address(&lookup("SERVER_ADDRESS").unwrap_or_default());

        let templates = WorkflowTemplates {
            single: var("WORKFLOW_SINGLE_PATH")
                .unwrap_or_else(|| DEFAULT_SINGLE_WORKFLOW.into())
                .into(),
            first_last_frame: var("WORKFLOW_FLF2V_PATH")
                .unwrap_or_else(|| DEFAULT_FLF2V_WORKFLOW.into())
                .into(),
        };

        let completion_secs = secs_var(
            "COMPLETION_TIMEOUT_SECS",
            var("COMPLETION_TIMEOUT_SECS"),
            DEFAULT_COMPLETION_TIMEOUT_SECS,
        );
        let download_secs = secs_var(
            "DOWNLOAD_TIMEOUT_SECS",
            var("DOWNLOAD_TIMEOUT_SECS"),
            DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        );

        Self {
            server_host,
            templates,
            default_image_path: var("DEFAULT_IMAGE_PATH")
                .unwrap_or_else(|| DEFAULT_IMAGE_PATH.into()),
            work_dir: var("WORK_DIR").unwrap_or_else(|| ".".into()).into(),
            comfyui_output_dir: var("COMFYUI_OUTPUT_DIR").map(PathBuf::from),
            completion_timeout: (completion_secs > 0).then(|| Duration::from_secs(completion_secs)),
            download_timeout: Duration::from_secs(download_secs),
            job_input_path: var("JOB_INPUT_PATH")
                .unwrap_or_else(|| DEFAULT_JOB_INPUT_PATH.into())
                .into(),
        }
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            completion_timeout: self.completion_timeout,
            output_dir: self.comfyui_output_dir.clone(),
            ..SessionConfig::default()
        }
    }
}

fn secs_var(name: &str, raw: Option<String>, default: u64) -> u64 {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %raw, default, "Invalid number of seconds, using default");
            default
        }),
    }
}

/// Reduce `SERVER_ADDRESS` to a bare host.
///
/// Strips a scheme (`http://`), anything after the first `/` and a port
/// suffix. Bracketed IPv6 literals keep their brackets; bare IPv6 literals
/// are bracketed so they can be embedded in a URL. Empty input yields
/// `127.0.0.1`.
pub fn sanitize_server_address(raw: &str) -> String {
    let mut host = raw.trim();

    if let Some((_, rest)) = host.split_once("://") {
        host = rest;
    }
    if let Some((authority, _)) = host.split_once('/') {
        host = authority;
    }

    let host = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else if host.matches(':').count() > 1 {
        return format!("[{host}]");
    } else {
        host.split(':').next().unwrap_or_default()
    };

    if host.is_empty() {
        DEFAULT_SERVER_HOST.to_string()
    } else {
        host.to_string()
    }
}

/// Output format of the log subscriber, from `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}
