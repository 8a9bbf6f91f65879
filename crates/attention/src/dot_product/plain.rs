//! Dot-product attention that scores queries directly against the values.
//!
//! There are no keys and no scaling: `score = query · valueᵀ`, softmax over
//! the source positions of each batch element and query row, and
//! `context = attn · value`.

use candle_core::Tensor;

use crate::core::{
    shapes::{dims3, expect_non_empty, softmax},
    AttentionError, AttentionOutput, Result,
};

#[derive(Debug, Clone)]
pub struct DotProductAttention {
    hidden_dim: usize,
}

impl DotProductAttention {
    pub fn new(hidden_dim: usize) -> Result<Self> {
        if hidden_dim == 0 {
            return Err(AttentionError::config(
                "dot-product attention requires a non-zero hidden_dim",
            ));
        }
        log::debug!("dot_product attention hidden_dim={}", hidden_dim);
        Ok(Self { hidden_dim })
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// `query`: `(batch, q_len, hidden)`, `value`: `(batch, v_len, hidden)`.
    ///
    /// Returns context `(batch, q_len, hidden)` and attn `(batch, q_len, v_len)`.
    pub fn attend(&self, query: &Tensor, value: &Tensor) -> Result<AttentionOutput> {
        let (batch, q_len, query_dim) = dims3("query", query)?;
        let (value_batch, v_len, value_dim) = dims3("value", value)?;
        if query_dim != self.hidden_dim {
            return Err(AttentionError::shape(
                "query",
                format!("(batch, q_len, {})", self.hidden_dim),
                query.dims(),
            ));
        }
        if value_batch != batch || value_dim != self.hidden_dim {
            return Err(AttentionError::shape(
                "value",
                format!("({batch}, v_len, {})", self.hidden_dim),
                value.dims(),
            ));
        }
        expect_non_empty("value", value, 1)?;
        log::trace!(
            "dot_product batch={} q_len={} v_len={}",
            batch,
            q_len,
            v_len
        );

        let value = value.contiguous()?;
        let value_t = value.transpose(1, 2)?.contiguous()?;
        let scores = query.contiguous()?.matmul(&value_t)?;
        let attn = softmax(&scores)?;
        let context = attn.matmul(&value)?;
        Ok(AttentionOutput { context, attn })
    }
}
