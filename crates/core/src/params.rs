//! Job input model and normalization into generation parameters.
//!
//! A job arrives as a loosely-typed JSON object. [`JobInput`] captures the
//! known keys, and [`GenerationParams::from_input`] applies defaults and
//! coerces numeric fields (JSON numbers or numeric strings) into the
//! values the injector writes into the workflow.

use serde::Deserialize;
use serde_json::{Number, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_LENGTH: i64 = 81;
pub const DEFAULT_STEPS: i64 = 8;
pub const DEFAULT_CFG: f64 = 2.0;
pub const DEFAULT_FPS: i64 = 16;
pub const DEFAULT_SEED: i64 = 42;
pub const DEFAULT_WIDTH: f64 = 480.0;
pub const DEFAULT_HEIGHT: f64 = 832.0;
pub const DEFAULT_CONTEXT_OVERLAP: i64 = 48;

/// Strength applied to a LoRA when the pair omits its weight.
pub const DEFAULT_LORA_WEIGHT: f64 = 1.0;

/// Maximum number of LoRA pairs the workflow has slots for.
pub const MAX_LORA_PAIRS: usize = 4;

/// Negative prompt used when the job does not provide one.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "bright tones, overexposed, static, blurred details, \
subtitles, style, works, paintings, images, static, overall gray, worst quality, low quality, \
JPEG compression residue, ugly, incomplete, extra fingers, poorly drawn hands, poorly drawn \
faces, deformed, disfigured, misshapen limbs, fused fingers, still picture, messy background, \
three legs, many people in the background, walking backwards";

// ---------------------------------------------------------------------------
// Job envelope
// ---------------------------------------------------------------------------

/// A job as delivered by the serverless dispatcher.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Job {
    /// Dispatcher-assigned job id, used only for log correlation.
    pub id: Option<String>,
    pub input: JobInput,
}

/// The `input` object of a job. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobInput {
    pub image_path: Option<String>,
    pub image_url: Option<String>,
    pub image_base64: Option<String>,
    pub end_image_path: Option<String>,
    pub end_image_url: Option<String>,
    pub end_image_base64: Option<String>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub length: Option<Value>,
    pub steps: Option<Value>,
    pub cfg: Option<Value>,
    pub fps: Option<Value>,
    pub seed: Option<Value>,
    pub width: Option<Value>,
    pub height: Option<Value>,
    pub context_overlap: Option<Value>,
    pub lora_pairs: Vec<LoraPair>,
}

/// One high-noise / low-noise LoRA pair as supplied by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoraPair {
    pub high: Option<String>,
    pub low: Option<String>,
    pub high_weight: Option<Value>,
    pub low_weight: Option<Value>,
}

/// How an input image is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// A path already present on the worker's filesystem.
    Path,
    /// A remote URL to download.
    Url,
    /// Base64-encoded file contents.
    Base64,
}

impl InputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InputMode::Path => "path",
            InputMode::Url => "url",
            InputMode::Base64 => "base64",
        }
    }
}

impl JobInput {
    /// The main image source, checked in path, url, base64 order.
    pub fn image_source(&self) -> Option<(InputMode, &str)> {
        first_source(
            self.image_path.as_deref(),
            self.image_url.as_deref(),
            self.image_base64.as_deref(),
        )
    }

    /// The optional end frame for first-last-frame generation.
    ///
    /// Empty values count as absent, so `"end_image_path": ""` keeps the
    /// job in single-image mode.
    pub fn end_image_source(&self) -> Option<(InputMode, &str)> {
        first_source(
            present(&self.end_image_path),
            present(&self.end_image_url),
            present(&self.end_image_base64),
        )
    }
}

fn first_source<'a>(
    path: Option<&'a str>,
    url: Option<&'a str>,
    base64: Option<&'a str>,
) -> Option<(InputMode, &'a str)> {
    path.map(|v| (InputMode::Path, v))
        .or_else(|| url.map(|v| (InputMode::Url, v)))
        .or_else(|| base64.map(|v| (InputMode::Base64, v)))
}

// ---------------------------------------------------------------------------
// Normalized parameters
// ---------------------------------------------------------------------------

/// A LoRA pair with weights resolved and empty names dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraSelection {
    pub high: Option<String>,
    pub low: Option<String>,
    pub high_weight: f64,
    pub low_weight: f64,
}

/// Fully defaulted parameters ready for injection.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub length: i64,
    pub steps: i64,
    pub cfg: f64,
    pub fps: i64,
    /// Sampler seed, exact over the full `i64` and `u64` ranges.
    pub seed: Number,
    /// Requested width before snapping to the 16-pixel grid.
    pub width: f64,
    /// Requested height before snapping to the 16-pixel grid.
    pub height: f64,
    pub context_overlap: i64,
    /// At most [`MAX_LORA_PAIRS`] entries.
    pub lora_pairs: Vec<LoraSelection>,
    /// Number of pairs discarded beyond [`MAX_LORA_PAIRS`].
    pub dropped_lora_pairs: usize,
}

impl GenerationParams {
    /// Apply defaults and coerce every numeric field of `input`.
    ///
    /// Returns [`CoreError::Validation`] when a numeric field holds
    /// something that is not a number or a numeric string, when an integer
    /// field does not fit, or when `steps` is below 1.
    pub fn from_input(input: &JobInput) -> Result<Self, CoreError> {
        let steps = int_field("steps", input.steps.as_ref(), DEFAULT_STEPS)?;
        if steps < 1 {
            return Err(CoreError::Validation(format!(
                "steps must be at least 1, got {steps}"
            )));
        }

        let dropped_lora_pairs = input.lora_pairs.len().saturating_sub(MAX_LORA_PAIRS);
        if dropped_lora_pairs > 0 {
            tracing::warn!(
                supplied = input.lora_pairs.len(),
                max = MAX_LORA_PAIRS,
                "Too many LoRA pairs, only the first {MAX_LORA_PAIRS} are used",
            );
        }

        let lora_pairs = input
            .lora_pairs
            .iter()
            .take(MAX_LORA_PAIRS)
            .map(LoraSelection::from_pair)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            prompt: input.prompt.clone().unwrap_or_default(),
            negative_prompt: input
                .negative_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_NEGATIVE_PROMPT.to_string()),
            length: int_field("length", input.length.as_ref(), DEFAULT_LENGTH)?,
            steps,
            cfg: float_field("cfg", input.cfg.as_ref(), DEFAULT_CFG)?,
            fps: int_field("fps", input.fps.as_ref(), DEFAULT_FPS)?,
            seed: integer_field("seed", input.seed.as_ref())?
                .unwrap_or_else(|| Number::from(DEFAULT_SEED)),
            width: float_field("width", input.width.as_ref(), DEFAULT_WIDTH)?,
            height: float_field("height", input.height.as_ref(), DEFAULT_HEIGHT)?,
            context_overlap: int_field(
                "context_overlap",
                input.context_overlap.as_ref(),
                DEFAULT_CONTEXT_OVERLAP,
            )?,
            lora_pairs,
            dropped_lora_pairs,
        })
    }
}

impl LoraSelection {
    fn from_pair(pair: &LoraPair) -> Result<Self, CoreError> {
        Ok(Self {
            high: non_empty(&pair.high),
            low: non_empty(&pair.low),
            high_weight: float_field(
                "high_weight",
                pair.high_weight.as_ref(),
                DEFAULT_LORA_WEIGHT,
            )?,
            low_weight: float_field(
                "low_weight",
                pair.low_weight.as_ref(),
                DEFAULT_LORA_WEIGHT,
            )?,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    present(value).map(str::to_string)
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Numeric coercion
// ---------------------------------------------------------------------------

/// Read an optional JSON number or numeric string. `null` counts as absent.
fn number_field(name: &str, value: Option<&Value>) -> Result<Option<f64>, CoreError> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(CoreError::Validation(format!(
            "{name} must be a number, got {}",
            value.map(Value::to_string).unwrap_or_default()
        ))),
    }
}

fn float_field(name: &str, value: Option<&Value>, default: f64) -> Result<f64, CoreError> {
    Ok(number_field(name, value)?.unwrap_or(default))
}

/// Read an optional integer. JSON integers and integer strings are kept
/// exact over the `i64` and `u64` ranges; fractional values truncate toward
/// zero and must fit an `i64`.
fn integer_field(name: &str, value: Option<&Value>) -> Result<Option<Number>, CoreError> {
    match value {
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => return Ok(Some(n.clone())),
        Some(Value::String(s)) => {
            let s = s.trim();
            if let Ok(exact) = s.parse::<i64>() {
                return Ok(Some(Number::from(exact)));
            }
            if let Ok(exact) = s.parse::<u64>() {
                return Ok(Some(Number::from(exact)));
            }
        }
        _ => {}
    }

    let Some(v) = number_field(name, value)? else {
        return Ok(None);
    };
    let truncated = v.trunc();
    // `i64::MAX as f64` rounds up to 2^63, which no longer fits.
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(out_of_range(name, value));
    }
    Ok(Some(Number::from(truncated as i64)))
}

fn int_field(name: &str, value: Option<&Value>, default: i64) -> Result<i64, CoreError> {
    match integer_field(name, value)? {
        None => Ok(default),
        Some(n) => n.as_i64().ok_or_else(|| out_of_range(name, value)),
    }
}

fn out_of_range(name: &str, value: Option<&Value>) -> CoreError {
    CoreError::Validation(format!(
        "{name} is out of range, got {}",
        value.map(Value::to_string).unwrap_or_default()
    ))
}
