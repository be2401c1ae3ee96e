//! Parameter injection into the Wan 2.2 image-to-video workflow.
//!
//! The templates are fixed ComfyUI graphs, so every job parameter maps to a
//! known `(node id, input name)` slot. Optional nodes are patched only when
//! the template contains them; the outcome of every patch is recorded in a
//! [`PatchReport`].

use serde_json::Value;

use crate::dimensions::to_nearest_multiple_of_16;
use crate::error::CoreError;
use crate::params::GenerationParams;
use crate::workflow::GraphDocument;

// ---------------------------------------------------------------------------
// Node ids in the Wan 2.2 templates
// ---------------------------------------------------------------------------

/// Prompt encoder (positive/negative text).
pub const NODE_TEXT_ENCODE: &str = "135";
/// High-noise sampler.
pub const NODE_HIGH_SAMPLER: &str = "220";
/// Start frame `LoadImage`.
pub const NODE_START_IMAGE: &str = "244";
/// Width constant.
pub const NODE_WIDTH: &str = "235";
/// Height constant.
pub const NODE_HEIGHT: &str = "236";
/// Low-noise sampler; also carries the scalar CFG.
pub const NODE_LOW_SAMPLER: &str = "540";
/// Image-to-video encoder holding the frame count.
pub const NODE_IMAGE_TO_VIDEO: &str = "541";
/// Context window scheduler.
pub const NODE_CONTEXT_OPTIONS: &str = "498";
/// Total sampling steps.
pub const NODE_TOTAL_STEPS: &str = "569";
/// Step at which sampling hands over from high- to low-noise model.
pub const NODE_SPLIT_STEP: &str = "575";
/// CFG schedule.
pub const NODE_CFG_SCHEDULE: &str = "570";
/// Video combine (output encoder).
pub const NODE_VIDEO_COMBINE: &str = "131";
/// End frame `LoadImage` (FLF2V template only).
pub const NODE_END_IMAGE: &str = "617";
/// LoRA stack applied to the high-noise model.
pub const NODE_HIGH_LORA: &str = "279";
/// LoRA stack applied to the low-noise model.
pub const NODE_LOW_LORA: &str = "553";

/// Nodes every template must contain.
pub const REQUIRED_NODES: &[&str] = &[
    NODE_START_IMAGE,
    NODE_IMAGE_TO_VIDEO,
    NODE_TEXT_ENCODE,
    NODE_HIGH_SAMPLER,
    NODE_LOW_SAMPLER,
    NODE_WIDTH,
    NODE_HEIGHT,
];

/// Nodes whose `force_offload` flag is cleared so models stay on the GPU.
pub const OFFLOAD_NODES: &[&str] = &[
    NODE_TEXT_ENCODE,
    NODE_HIGH_SAMPLER,
    NODE_LOW_SAMPLER,
    NODE_IMAGE_TO_VIDEO,
];

/// Share of the total steps run on the high-noise model.
const SPLIT_STEP_RATIO: f64 = 0.6;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One attempted write of `node.inputs[input]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub node: String,
    pub input: String,
}

/// Which patches landed and which were skipped because the node is absent.
#[derive(Debug, Clone, Default)]
pub struct PatchReport {
    pub applied: Vec<Patch>,
    pub skipped: Vec<Patch>,
    /// Width written to the graph after snapping.
    pub width: i64,
    /// Height written to the graph after snapping.
    pub height: i64,
    /// Derived split step, set only when the split-step node exists.
    pub split_steps: Option<i64>,
}

impl PatchReport {
    pub fn was_applied(&self, node: &str, input: &str) -> bool {
        self.applied
            .iter()
            .any(|p| p.node == node && p.input == input)
    }

    pub fn was_skipped(&self, node: &str, input: &str) -> bool {
        self.skipped
            .iter()
            .any(|p| p.node == node && p.input == input)
    }
}

/// Patch writer that records every outcome.
struct Patcher<'a> {
    graph: &'a mut GraphDocument,
    report: PatchReport,
}

impl Patcher<'_> {
    fn set(&mut self, node: &str, input: &str, value: impl Into<Value>) {
        if self.graph.set_input(node, input, value) {
            self.report.applied.push(Patch {
                node: node.to_string(),
                input: input.to_string(),
            });
        } else {
            self.skip(node, input);
        }
    }

    fn skip(&mut self, node: &str, input: &str) {
        tracing::debug!(node, input, "Node absent from workflow, patch skipped");
        self.report.skipped.push(Patch {
            node: node.to_string(),
            input: input.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Fail with [`CoreError::TemplateLoad`] if any [`REQUIRED_NODES`] entry is
/// missing from `graph`.
pub fn check_required_nodes(graph: &GraphDocument) -> Result<(), CoreError> {
    let missing: Vec<&str> = REQUIRED_NODES
        .iter()
        .copied()
        .filter(|id| !graph.contains(id))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoreError::TemplateLoad(format!(
            "workflow is missing required node(s): {}",
            missing.join(", ")
        )))
    }
}

/// Number of steps run on the high-noise model: 60% of `steps`, kept
/// within `1..=steps-1` (the lower bound wins when `steps < 2`).
pub fn split_steps(steps: i64) -> i64 {
    let split = (steps as f64 * SPLIT_STEP_RATIO).round_ties_even() as i64;
    split.min(steps.saturating_sub(1)).max(1)
}

/// Apply `params` and the resolved image paths to `graph` in place.
pub fn inject(
    graph: &mut GraphDocument,
    params: &GenerationParams,
    image_path: &str,
    end_image_path: Option<&str>,
) -> Result<PatchReport, CoreError> {
    check_required_nodes(graph)?;

    let width = snap_dimension("Width", params.width)?;
    let height = snap_dimension("Height", params.height)?;

    let mut patcher = Patcher {
        graph,
        report: PatchReport {
            width,
            height,
            ..PatchReport::default()
        },
    };

    for node in OFFLOAD_NODES {
        patcher.set(node, "force_offload", false);
    }

    patcher.set(NODE_START_IMAGE, "image", image_path);
    patcher.set(NODE_IMAGE_TO_VIDEO, "num_frames", params.length);
    patcher.set(NODE_TEXT_ENCODE, "positive_prompt", params.prompt.as_str());
    patcher.set(
        NODE_TEXT_ENCODE,
        "negative_prompt",
        params.negative_prompt.as_str(),
    );
    patcher.set(NODE_HIGH_SAMPLER, "seed", params.seed.clone());
    patcher.set(NODE_LOW_SAMPLER, "seed", params.seed.clone());

    patcher.set(NODE_WIDTH, "value", width);
    patcher.set(NODE_HEIGHT, "value", height);

    patcher.set(NODE_CONTEXT_OPTIONS, "context_overlap", params.context_overlap);
    patcher.set(NODE_CONTEXT_OPTIONS, "context_frames", params.length);

    patcher.set(NODE_TOTAL_STEPS, "value", params.steps);

    let split = patcher
        .graph
        .contains(NODE_SPLIT_STEP)
        .then(|| split_steps(params.steps));
    match split {
        Some(value) => patcher.set(NODE_SPLIT_STEP, "value", value),
        None => patcher.skip(NODE_SPLIT_STEP, "value"),
    }
    patcher.report.split_steps = split;

    patcher.set(NODE_CFG_SCHEDULE, "cfg_scale_start", params.cfg);
    patcher.set(NODE_CFG_SCHEDULE, "cfg_scale_end", params.cfg);
    patcher.set(NODE_LOW_SAMPLER, "cfg", params.cfg);

    patcher.set(NODE_VIDEO_COMBINE, "frame_rate", params.fps);

    if let Some(end_image) = end_image_path {
        patcher.set(NODE_END_IMAGE, "image", end_image);
    }

    for (i, pair) in params.lora_pairs.iter().enumerate() {
        let slot = i + 1;
        if let Some(high) = &pair.high {
            patcher.set(NODE_HIGH_LORA, &format!("lora_{slot}"), high.as_str());
            patcher.set(NODE_HIGH_LORA, &format!("strength_{slot}"), pair.high_weight);
            tracing::info!(slot, lora = %high, weight = pair.high_weight, "High-noise LoRA applied");
        }
        if let Some(low) = &pair.low {
            patcher.set(NODE_LOW_LORA, &format!("lora_{slot}"), low.as_str());
            patcher.set(NODE_LOW_LORA, &format!("strength_{slot}"), pair.low_weight);
            tracing::info!(slot, lora = %low, weight = pair.low_weight, "Low-noise LoRA applied");
        }
    }

    Ok(patcher.report)
}

fn snap_dimension(label: &str, requested: f64) -> Result<i64, CoreError> {
    let adjusted = to_nearest_multiple_of_16(requested)?;
    if adjusted as f64 != requested {
        tracing::info!(
            requested,
            adjusted,
            "{label} adjusted to nearest multiple of 16",
        );
    }
    Ok(adjusted)
}
