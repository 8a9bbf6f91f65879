//! Multi-head attention ("Attention Is All You Need").
//!
//! Query, key and value are projected, split into `num_heads` heads of
//! `hidden_dim / num_heads` features and flattened head-major to
//! `(heads * batch, len, head_dim)`. The `(batch, q_len, k_len)` mask is
//! repeated in the same order so every head sees its own batch element's
//! mask. Heads are concatenated back to `(batch, q_len, hidden)`; there is no
//! output projection.

use candle_core::Tensor;
use layers::{params::scoped, Initializer, Linear, LinearConfig, Parameters};

use crate::core::{
    merge_heads,
    shapes::{dims3, expect_features, expect_non_empty},
    split_heads, Attention, AttentionError, AttentionOutput, Config, HeadLayout, Result,
};
use crate::dot_product::ScaledDotProductAttention;
use crate::masks::expect_mask;

const LAYOUT: HeadLayout = HeadLayout::HeadMajor;

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    hidden_dim: usize,
    num_heads: usize,
    head_dim: usize,
    scaled_dot_attn: ScaledDotProductAttention,
    query_proj: Linear,
    key_proj: Linear,
    value_proj: Linear,
}

impl MultiHeadAttention {
    pub fn new(config: &Config, initializer: &mut Initializer) -> Result<Self> {
        let head_dim = config.head_dim()?;
        let hidden = config.hidden_dim;
        let query_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        let key_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        let value_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        log::debug!(
            "multi-head attention hidden_dim={} heads={} head_dim={}",
            hidden,
            config.num_heads,
            head_dim
        );
        Ok(Self {
            hidden_dim: hidden,
            num_heads: config.num_heads,
            head_dim,
            scaled_dot_attn: ScaledDotProductAttention::new(),
            query_proj,
            key_proj,
            value_proj,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

impl Attention for MultiHeadAttention {
    /// Returns context `(batch, q_len, hidden)` and attn
    /// `(heads * batch, q_len, k_len)`, where row `h * batch + b` holds head
    /// `h` of batch element `b`.
    fn attend(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput> {
        let (batch, q_len, _) = dims3("query", query)?;
        let (key_batch, k_len, _) = dims3("key", key)?;
        let (value_batch, v_len, _) = dims3("value", value)?;
        expect_features("query", query, self.hidden_dim)?;
        expect_features("key", key, self.hidden_dim)?;
        expect_features("value", value, self.hidden_dim)?;
        if key_batch != batch {
            return Err(AttentionError::shape(
                "key",
                format!("({batch}, k_len, {})", self.hidden_dim),
                key.dims(),
            ));
        }
        if value_batch != batch || v_len != k_len {
            return Err(AttentionError::shape(
                "value",
                format!("({batch}, {k_len}, {})", self.hidden_dim),
                value.dims(),
            ));
        }
        expect_non_empty("key", key, 1)?;
        log::trace!(
            "multi-head batch={} heads={} q_len={} k_len={}",
            batch,
            self.num_heads,
            q_len,
            k_len
        );

        let heads = self.num_heads;
        let query = split_heads(&self.query_proj.forward(query)?, heads, LAYOUT)?;
        let key = split_heads(&self.key_proj.forward(key)?, heads, LAYOUT)?;
        let value = split_heads(&self.value_proj.forward(value)?, heads, LAYOUT)?;

        let mask = match mask {
            Some(mask) => {
                expect_mask(mask, &[batch, q_len, k_len], "(batch, q_len, k_len)")?;
                Some(
                    mask.unsqueeze(0)?
                        .broadcast_as((heads, batch, q_len, k_len))?
                        .contiguous()?
                        .reshape((heads * batch, q_len, k_len))?,
                )
            }
            None => None,
        };

        let AttentionOutput { context, attn } =
            self.scaled_dot_attn
                .attend(&query, &key, &value, mask.as_ref())?;
        let context = merge_heads(&context, batch, LAYOUT)?;
        Ok(AttentionOutput { context, attn })
    }
}

impl Parameters for MultiHeadAttention {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = scoped("query_proj", self.query_proj.parameters());
        params.extend(scoped("key_proj", self.key_proj.parameters()));
        params.extend(scoped("value_proj", self.value_proj.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = scoped("query_proj", self.query_proj.parameters_mut());
        params.extend(scoped("key_proj", self.key_proj.parameters_mut()));
        params.extend(scoped("value_proj", self.value_proj.parameters_mut()));
        params
    }
}
