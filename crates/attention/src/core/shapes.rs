//! Shape validation and head split/merge helpers.
//!
//! Multi-head modules flatten `(batch, heads)` into one leading axis so a
//! single batched matmul covers every head. Two flattening orders exist and
//! are selected with [`HeadLayout`].

use candle_core::Tensor;
use candle_nn::ops::softmax_last_dim;

use super::errors::{AttentionError, Result};

/// Order in which `(batch, heads)` are flattened into the leading axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadLayout {
    /// `index = b * heads + h`.
    BatchMajor,
    /// `index = h * batch + b`.
    HeadMajor,
}

/// Unpacks a `(batch, len, features)` tensor.
pub(crate) fn dims3(name: &'static str, tensor: &Tensor) -> Result<(usize, usize, usize)> {
    match tensor.dims() {
        &[b, l, f] => Ok((b, l, f)),
        other => Err(AttentionError::shape(name, "(batch, len, features)", other)),
    }
}

/// Requires `tensor` to have exactly `expected` dims; `layout` names the axes in errors.
pub(crate) fn expect_dims(
    name: &'static str,
    tensor: &Tensor,
    expected: &[usize],
    layout: &str,
) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(AttentionError::shape(
            name,
            format!("{layout} = {expected:?}"),
            tensor.dims(),
        ))
    }
}

/// Requires the trailing dimension of `tensor` to equal `features`.
pub(crate) fn expect_features(name: &'static str, tensor: &Tensor, features: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&last) if last == features => Ok(()),
        _ => Err(AttentionError::shape(
            name,
            format!("(.., {features})"),
            tensor.dims(),
        )),
    }
}

/// Rejects an empty sequence axis before it reaches a reduction.
pub(crate) fn expect_non_empty(name: &'static str, tensor: &Tensor, axis: usize) -> Result<()> {
    match tensor.dims().get(axis) {
        Some(&len) if len > 0 => Ok(()),
        _ => Err(AttentionError::shape(
            name,
            format!("non-empty axis {axis}"),
            tensor.dims(),
        )),
    }
}

/// Softmax over the last axis, which must be non-empty.
pub(crate) fn softmax(scores: &Tensor) -> Result<Tensor> {
    expect_non_empty("scores", scores, scores.rank().saturating_sub(1))?;
    Ok(softmax_last_dim(&scores.contiguous()?)?)
}

/// `(batch, len, heads * head_dim)` → `(batch * heads, len, head_dim)`.
pub fn split_heads(x: &Tensor, heads: usize, layout: HeadLayout) -> Result<Tensor> {
    let (batch, len, features) = dims3("split_heads.input", x)?;
    if features % heads != 0 {
        return Err(AttentionError::shape(
            "split_heads.input",
            format!("feature dim divisible by {heads}"),
            x.dims(),
        ));
    }
    let head_dim = features / heads;
    let x = x.reshape((batch, len, heads, head_dim))?;
    let x = match layout {
        HeadLayout::BatchMajor => x.transpose(1, 2)?,
        HeadLayout::HeadMajor => x.permute((2, 0, 1, 3))?,
    };
    Ok(x.contiguous()?.reshape((batch * heads, len, head_dim))?)
}

/// Inverse of [`split_heads`]: `(batch * heads, len, head_dim)` → `(batch, len, heads * head_dim)`.
pub fn merge_heads(x: &Tensor, batch: usize, layout: HeadLayout) -> Result<Tensor> {
    let (merged, len, head_dim) = dims3("merge_heads.input", x)?;
    if batch == 0 || merged % batch != 0 {
        return Err(AttentionError::shape(
            "merge_heads.input",
            format!("leading dim divisible by batch {batch}"),
            x.dims(),
        ));
    }
    let heads = merged / batch;
    let x = match layout {
        HeadLayout::BatchMajor => x.reshape((batch, heads, len, head_dim))?.transpose(1, 2)?,
        HeadLayout::HeadMajor => x
            .reshape((heads, batch, len, head_dim))?
            .permute((1, 2, 0, 3))?,
    };
    Ok(x.contiguous()?.reshape((batch, len, heads * head_dim))?)
}
