//! Mask utilities shared by attention implementations.
//!
//! Masks are boolean tensors with dtype `u8` shaped `(batch, q_len, k_len)`.
//! A non-zero entry marks a key position the query must not attend to.
//!
//! Every module applies masks with [`masked_fill`], which writes a large
//! finite negative score ([`MASK_FILL_VALUE`]) rather than negative infinity.
//! Masked keys still receive zero probability after the softmax, while a row
//! whose keys are all masked degrades to a uniform distribution instead of
//! producing NaNs.

pub mod causal;
pub mod padding;

use candle_core::{DType, Tensor};

use crate::core::{AttentionError, Result};

/// Dtype shared by all boolean masks.
pub const MASK_DTYPE: DType = DType::U8;

/// Score written into masked positions before normalisation.
pub const MASK_FILL_VALUE: f32 = -1e9;

pub use causal::build_causal_mask;
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};

/// Largest-magnitude finite fill representable in `dtype`.
fn fill_value_for(dtype: DType) -> f32 {
    match dtype {
        DType::F16 => -6.0e4,
        _ => MASK_FILL_VALUE,
    }
}

/// Checks a caller-provided mask against the expected dims.
pub(crate) fn expect_mask(mask: &Tensor, expected: &[usize], layout: &str) -> Result<()> {
    if mask.dtype() != MASK_DTYPE {
        return Err(AttentionError::UnsupportedDType {
            tensor: "mask",
            dtype: mask.dtype(),
        });
    }
    crate::core::shapes::expect_dims("mask", mask, expected, layout)
}

/// Replaces every score whose (broadcast) mask entry is non-zero with the fill value.
pub fn masked_fill(scores: &Tensor, mask: &Tensor) -> Result<Tensor> {
    if mask.dtype() != MASK_DTYPE {
        return Err(AttentionError::UnsupportedDType {
            tensor: "mask",
            dtype: mask.dtype(),
        });
    }
    let mask = mask
        .broadcast_as(scores.shape())
        .map_err(|_| {
            AttentionError::shape(
                "mask",
                format!("broadcastable to {:?}", scores.dims()),
                mask.dims(),
            )
        })?
        .contiguous()?;
    let fill = Tensor::full(fill_value_for(scores.dtype()), scores.shape(), scores.device())?
        .to_dtype(scores.dtype())?;
    Ok(mask.where_cond(&fill, scores)?)
}
