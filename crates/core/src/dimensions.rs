//! Frame dimension snapping for the Wan video pipeline.
//!
//! The sampler works on 16-pixel latent blocks, so requested widths and
//! heights are snapped to the nearest multiple of 16 before they are
//! written into the workflow.

use crate::error::CoreError;

/// Block size every output dimension must be a multiple of.
pub const DIMENSION_MULTIPLE: i64 = 16;

/// Round `value` to the nearest multiple of 16, never going below 16.
///
/// Halfway values round to the even multiple (`504 -> 512`,
/// `488 -> 480`). Non-finite input and values whose snapped size does not
/// fit an `i64` are rejected.
pub fn to_nearest_multiple_of_16(value: f64) -> Result<i64, CoreError> {
    if !value.is_finite() {
        return Err(CoreError::Validation(format!(
            "width/height must be a finite number, got {value}"
        )));
    }

    let blocks = (value / DIMENSION_MULTIPLE as f64).round_ties_even();
    let snapped = blocks * DIMENSION_MULTIPLE as f64;
    // `i64::MAX as f64` is 2^63, the first value the cast would saturate.
    if snapped >= i64::MAX as f64 {
        return Err(CoreError::Validation(format!(
            "width/height {value} is out of range"
        )));
    }
    Ok((snapped as i64).max(DIMENSION_MULTIPLE))
}
