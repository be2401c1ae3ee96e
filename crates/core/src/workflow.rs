//! ComfyUI workflow graph document and template selection.
//!
//! Templates are ComfyUI "API format" workflows: a JSON object keyed by
//! node id, where each value carries a `class_type` and an `inputs` map:
//!
//! ```json
//! {
//!   "244": { "class_type": "LoadImage", "inputs": { "image": "example.png" } }
//! }
//! ```
//!
//! Node order from the file is preserved through load and submission.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// A single node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// ComfyUI class type (e.g. "WanVideoSampler", "LoadImage").
    pub class_type: String,
    /// Literal values and links (`[node_id, slot]`) keyed by input name.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Any other node fields (such as `_meta`), passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A ComfyUI workflow keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphDocument {
    nodes: IndexMap<String, GraphNode>,
}

impl GraphDocument {
    /// Read and parse a workflow template from disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::TemplateLoad(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw).map_err(|e| match e {
            CoreError::TemplateLoad(msg) => {
                CoreError::TemplateLoad(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse a workflow from its JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let document: Self = serde_json::from_str(raw)
            .map_err(|e| CoreError::TemplateLoad(format!("malformed workflow JSON: {e}")))?;
        if document.nodes.is_empty() {
            return Err(CoreError::TemplateLoad(
                "workflow must contain at least one node".to_string(),
            ));
        }
        Ok(document)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(node_id)
    }

    /// Node ids in document order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Look up a single input value.
    pub fn input(&self, node_id: &str, input: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.inputs.get(input)
    }

    /// Set `node_id.inputs[input]` if the node exists.
    ///
    /// Returns `false` (and leaves the graph untouched) when the node is
    /// absent.
    pub fn set_input(&mut self, node_id: &str, input: &str, value: impl Into<Value>) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.inputs.insert(input.to_string(), value.into());
                true
            }
            None => false,
        }
    }
}

/// Which workflow template a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowMode {
    /// Image-to-video from a single start frame.
    Single,
    /// First-last-frame-to-video (FLF2V), conditioned on an end frame too.
    FirstLastFrame,
}

impl WorkflowMode {
    /// FLF2V when an end image was resolved, single otherwise.
    pub fn select(has_end_image: bool) -> Self {
        if has_end_image {
            WorkflowMode::FirstLastFrame
        } else {
            WorkflowMode::Single
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkflowMode::Single => "single",
            WorkflowMode::FirstLastFrame => "flf2v",
        }
    }
}

/// Filesystem locations of the two workflow templates.
#[derive(Debug, Clone)]
pub struct WorkflowTemplates {
    pub single: PathBuf,
    pub first_last_frame: PathBuf,
}

impl WorkflowTemplates {
    pub fn path_for(&self, mode: WorkflowMode) -> &Path {
        match mode {
            WorkflowMode::Single => &self.single,
            WorkflowMode::FirstLastFrame => &self.first_last_frame,
        }
    }

    /// Load the template for `mode`.
    pub fn load(&self, mode: WorkflowMode) -> Result<GraphDocument, CoreError> {
        GraphDocument::load(self.path_for(mode))
    }
}
