//! Artifact extraction from ComfyUI execution history.
//!
//! Once a prompt completes, `GET /history/{prompt_id}` lists what every
//! output node produced. Video-combine nodes report their files under
//! `gifs`, each with a server-local `fullpath`. This module reads those
//! files and base64-encodes them for the job response.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;
use serde::Deserialize;

/// Execution record for one prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Per-node outputs, in the order the server listed them.
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
    /// Raw execution status block.
    #[serde(default)]
    pub status: serde_json::Value,
}

/// Output of a single node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    /// Videos written by `VHS_VideoCombine`.
    #[serde(default)]
    pub gifs: Option<Vec<MediaDescriptor>>,
}

/// A generated media file as described in the history record.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaDescriptor {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    /// Absolute path on the server's filesystem.
    #[serde(default)]
    pub fullpath: Option<String>,
}

impl MediaDescriptor {
    /// Where the file lives on disk.
    ///
    /// Prefers `fullpath`; otherwise joins `output_dir`, `subfolder` and
    /// `filename` when an output directory is known.
    pub fn local_path(&self, output_dir: Option<&Path>) -> Option<PathBuf> {
        if let Some(full) = &self.fullpath {
            return Some(PathBuf::from(full));
        }
        let filename = self.filename.as_deref()?;
        let mut path = output_dir?.to_path_buf();
        if !self.subfolder.is_empty() {
            path.push(&self.subfolder);
        }
        path.push(filename);
        Some(path)
    }
}

/// Base64-encoded artifacts keyed by node id, in history order.
pub type NodeArtifacts = IndexMap<String, Vec<String>>;

/// Errors while collecting artifacts from history.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// A descriptor carried neither `fullpath` nor a resolvable filename.
    #[error("Output of node {node} has no file path")]
    MissingPath { node: String },

    /// The referenced file could not be read.
    #[error("Failed to read output {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read and encode every video listed in `entry`.
///
/// Every node in the record gets an entry; nodes without videos map to an
/// empty list.
pub async fn collect_artifacts(
    entry: &HistoryEntry,
    output_dir: Option<&Path>,
) -> Result<NodeArtifacts, OutputError> {
    let mut artifacts = NodeArtifacts::new();

    for (node_id, output) in &entry.outputs {
        let mut encoded = Vec::new();

        for descriptor in output.gifs.iter().flatten() {
            let path = descriptor
                .local_path(output_dir)
                .ok_or_else(|| OutputError::MissingPath {
                    node: node_id.clone(),
                })?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| OutputError::Read {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!(node = %node_id, path = %path.display(), bytes = bytes.len(), "Collected output video");
            encoded.push(STANDARD.encode(&bytes));
        }

        artifacts.insert(node_id.clone(), encoded);
    }

    Ok(artifacts)
}

/// The first artifact of the first node that produced any.
pub fn first_artifact(artifacts: &NodeArtifacts) -> Option<&str> {
    artifacts
        .values()
        .find_map(|videos| videos.first())
        .map(String::as_str)
}
