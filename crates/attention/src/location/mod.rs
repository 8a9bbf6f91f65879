//! Location-aware attention for step-wise decoders.
//!
//! These variants condition each step on the alignment produced by the
//! previous step through a 1D convolution over that alignment. They keep no
//! state: callers pass the previous `attn` back as `last_attn`, either by
//! hand or through [`unroll`](crate::core::unroll).

pub mod customizing;
pub mod multi_head;
pub mod single;

pub use customizing::CustomizingAttention;
pub use multi_head::MultiHeadLocationAwareAttention;
pub use single::LocationAwareAttention;

use candle_core::{DType, Device, Tensor};

use crate::core::{shapes::expect_dims, Result};

/// Kernel width of every location convolution.
pub(crate) const LOCATION_KERNEL: usize = 3;

/// Returns the caller's previous alignment, or zeros shaped `dims` when absent.
pub(crate) fn previous_alignment(
    last_attn: Option<&Tensor>,
    dims: &[usize],
    layout: &str,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    match last_attn {
        Some(last_attn) => {
            expect_dims("last_attn", last_attn, dims, layout)?;
            Ok(last_attn.to_dtype(dtype)?)
        }
        None => Ok(Tensor::zeros(dims, dtype, device)?),
    }
}
