//! Multi-head location-aware attention.
//!
//! The previous alignment of every head is convolved jointly (heads are the
//! input channels), projected to `head_dim` and shared by all heads as a
//! location energy. Heads are flattened batch-major so the returned
//! `(batch, heads, v_len)` alignment feeds straight back as `last_attn`.

use candle_core::Tensor;
use layers::{
    params::scoped, Conv1d, Conv1dConfig, Initializer, Linear, LinearConfig, Parameters,
};

use super::{previous_alignment, LOCATION_KERNEL};
use crate::additive::AttentionScore;
use crate::core::{
    merge_heads,
    shapes::{dims3, expect_features, expect_non_empty, softmax},
    split_heads, AttentionError, AttentionOutput, Config, HeadLayout, LocationAttention, Result,
};

#[derive(Debug, Clone)]
pub struct MultiHeadLocationAwareAttention {
    hidden_dim: usize,
    num_heads: usize,
    head_dim: usize,
    conv1d: Conv1d,
    loc_proj: Linear,
    query_proj: Linear,
    value_proj: Linear,
    attn_score: AttentionScore,
}

impl MultiHeadLocationAwareAttention {
    pub fn new(config: &Config, initializer: &mut Initializer) -> Result<Self> {
        let head_dim = config.head_dim()?;
        let hidden = config.hidden_dim;
        let heads = config.num_heads;
        let conv1d = Conv1d::with_default_init(
            Conv1dConfig::same(heads, config.conv_out_channel, LOCATION_KERNEL),
            initializer,
        )?;
        let loc_proj = Linear::with_default_init(
            LinearConfig::no_bias(config.conv_out_channel, head_dim),
            initializer,
        )?;
        let query_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let value_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let attn_score = AttentionScore::new(head_dim, initializer)?;
        log::debug!(
            "multi-head location-aware attention hidden_dim={} heads={} conv_out_channel={}",
            hidden,
            heads,
            config.conv_out_channel
        );
        Ok(Self {
            hidden_dim: hidden,
            num_heads: heads,
            head_dim,
            conv1d,
            loc_proj,
            query_proj,
            value_proj,
            attn_score,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

impl LocationAttention for MultiHeadLocationAwareAttention {
    /// `query`: `(batch, 1, hidden)`, `value`: `(batch, v_len, hidden)`,
    /// `last_attn`: `(batch, heads, v_len)`.
    ///
    /// Returns context `(batch, 1, hidden)` and attn `(batch, heads, v_len)`.
    fn attend_step(
        &self,
        query: &Tensor,
        value: &Tensor,
        last_attn: Option<&Tensor>,
    ) -> Result<AttentionOutput> {
        let (batch, q_len, _) = dims3("query", query)?;
        let (value_batch, seq_len, _) = dims3("value", value)?;
        if q_len != 1 {
            return Err(AttentionError::shape(
                "query",
                format!("(batch, 1, {})", self.hidden_dim),
                query.dims(),
            ));
        }
        expect_features("query", query, self.hidden_dim)?;
        expect_features("value", value, self.hidden_dim)?;
        if value_batch != batch {
            return Err(AttentionError::shape(
                "value",
                format!("({batch}, v_len, {})", self.hidden_dim),
                value.dims(),
            ));
        }
        let heads = self.num_heads;
        let last_attn = previous_alignment(
            last_attn,
            &[batch, heads, seq_len],
            "(batch, heads, v_len)",
            value.dtype(),
            value.device(),
        )?;
        expect_non_empty("value", value, 1)?;
        log::trace!(
            "multi-head location-aware batch={} heads={} v_len={}",
            batch,
            heads,
            seq_len
        );

        // (B, H, T) -> (B, C, T) -> (B, T, head_dim), shared by every head.
        let conv_feat = self.conv1d.forward(&last_attn)?.transpose(1, 2)?;
        let loc_energy = self.loc_proj.forward(&conv_feat)?.tanh()?;
        let loc_energy = loc_energy
            .unsqueeze(1)?
            .broadcast_as((batch, heads, seq_len, self.head_dim))?
            .contiguous()?
            .reshape((batch * heads, seq_len, self.head_dim))?;

        let query = split_heads(&self.query_proj.forward(query)?, heads, HeadLayout::BatchMajor)?;
        let value = split_heads(&self.value_proj.forward(value)?, heads, HeadLayout::BatchMajor)?;

        let score = self
            .attn_score
            .forward(&value.broadcast_add(&query)?.add(&loc_energy)?)?;
        let attn = softmax(&score)?;

        let context = attn.unsqueeze(1)?.matmul(&value)?;
        let context = merge_heads(&context, batch, HeadLayout::BatchMajor)?;
        let attn = attn.reshape((batch, heads, seq_len))?;
        Ok(AttentionOutput { context, attn })
    }
}

impl Parameters for MultiHeadLocationAwareAttention {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = scoped("conv1d", self.conv1d.parameters());
        params.extend(scoped("loc_proj", self.loc_proj.parameters()));
        params.extend(scoped("query_proj", self.query_proj.parameters()));
        params.extend(scoped("value_proj", self.value_proj.parameters()));
        params.extend(scoped("attn_score", self.attn_score.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = scoped("conv1d", self.conv1d.parameters_mut());
        params.extend(scoped("loc_proj", self.loc_proj.parameters_mut()));
        params.extend(scoped("query_proj", self.query_proj.parameters_mut()));
        params.extend(scoped("value_proj", self.value_proj.parameters_mut()));
        params.extend(scoped("attn_score", self.attn_score.parameters_mut()));
        params
    }
}
