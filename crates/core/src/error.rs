//! Errors raised while turning a job into a ready-to-submit workflow.

/// Failures in job normalization and workflow preparation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A job field held a value that cannot be used (non-numeric,
    /// out of range, or below its minimum).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A workflow template was missing, malformed, or lacked a node the
    /// injector always writes.
    #[error("Failed to load workflow template: {0}")]
    TemplateLoad(String),
}
