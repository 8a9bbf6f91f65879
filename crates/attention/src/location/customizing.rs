//! Customizing attention: multi-head dot-product attention whose values are
//! shifted by a per-head location energy derived from the previous alignment.
//!
//! Each head's previous alignment `(batch * heads, v_len)` is convolved on
//! its own, projected to `head_dim` and reassembled to `(batch, v_len,
//! hidden)`. Together with a learned bias it is added to the projected
//! values before the heads are split. Heads are flattened batch-major.

use candle_core::Tensor;
use layers::{
    params::scoped, Conv1d, Conv1dConfig, Initializer, Linear, LinearConfig, ParamInit,
    Parameters,
};

use super::{previous_alignment, LOCATION_KERNEL};
use crate::additive::SCORE_BIAS_RANGE;
use crate::core::{
    merge_heads,
    shapes::{dims3, expect_features, expect_non_empty},
    split_heads, AttentionError, AttentionOutput, Config, HeadLayout, LocationAttention, Result,
};
use crate::dot_product::DotProductAttention;

#[derive(Debug, Clone)]
pub struct CustomizingAttention {
    hidden_dim: usize,
    num_heads: usize,
    head_dim: usize,
    dot_attn: DotProductAttention,
    conv1d: Conv1d,
    query_proj: Linear,
    value_proj: Linear,
    loc_proj: Linear,
    bias: Tensor,
}

impl CustomizingAttention {
    pub fn new(config: &Config, initializer: &mut Initializer) -> Result<Self> {
        let head_dim = config.head_dim()?;
        let hidden = config.hidden_dim;
        let dot_attn = DotProductAttention::new(head_dim)?;
        let conv1d = Conv1d::with_default_init(
            Conv1dConfig::same(1, config.conv_out_channel, LOCATION_KERNEL),
            initializer,
        )?;
        let query_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        let value_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let loc_proj = Linear::with_default_init(
            LinearConfig::no_bias(config.conv_out_channel, head_dim),
            initializer,
        )?;
        let bias = initializer.sample(hidden, &ParamInit::symmetric(SCORE_BIAS_RANGE))?;
        log::debug!(
            "customizing attention hidden_dim={} heads={} conv_out_channel={}",
            hidden,
            config.num_heads,
            config.conv_out_channel
        );
        Ok(Self {
            hidden_dim: hidden,
            num_heads: config.num_heads,
            head_dim,
            dot_attn,
            conv1d,
            query_proj,
            value_proj,
            loc_proj,
            bias,
        })
    }

    /// Location energy `(batch, v_len, hidden)` from `(batch * heads, v_len)` alignments.
    fn location_energy(&self, last_attn: &Tensor, batch: usize, v_len: usize) -> Result<Tensor> {
        let heads = self.num_heads;
        // (B*H, 1, V) -> (B*H, C, V) -> (B, H, V, C)
        let conv_feat = self.conv1d.forward(&last_attn.unsqueeze(1)?)?;
        let channels = conv_feat.dim(1)?;
        let conv_feat = conv_feat
            .reshape((batch, heads, channels, v_len))?
            .transpose(2, 3)?;
        // (B, H, V, head_dim) -> (B, V, H, head_dim) -> (B, V, hidden)
        let energy = self.loc_proj.forward(&conv_feat)?;
        Ok(energy
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, v_len, self.hidden_dim))?)
    }
}

impl LocationAttention for CustomizingAttention {
    /// `query`: `(batch, q_len, hidden)`, `value`: `(batch, v_len, hidden)`,
    /// `last_attn`: `(batch * heads, v_len)`.
    ///
    /// Returns context `(batch, q_len, hidden)` and attn `(batch * heads,
    /// v_len)` when `q_len == 1`, `(batch * heads, q_len, v_len)` otherwise.
    fn attend_step(
        &self,
        query: &Tensor,
        value: &Tensor,
        last_attn: Option<&Tensor>,
    ) -> Result<AttentionOutput> {
        let (batch, q_len, _) = dims3("query", query)?;
        let (value_batch, v_len, _) = dims3("value", value)?;
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
            &[batch * heads, v_len],
            "(batch * heads, v_len)",
            value.dtype(),
            value.device(),
        )?;
        expect_non_empty("value", value, 1)?;
        log::trace!(
            "customizing batch={} heads={} q_len={} v_len={}",
            batch,
            heads,
            q_len,
            v_len
        );

        let loc_energy = self.location_energy(&last_attn, batch, v_len)?;
        let bias = self.bias.to_dtype(value.dtype())?;
        let value = self
            .value_proj
            .forward(value)?
            .add(&loc_energy)?
            .broadcast_add(&bias)?;

        let query = split_heads(&self.query_proj.forward(query)?, heads, HeadLayout::BatchMajor)?;
        let value = split_heads(&value, heads, HeadLayout::BatchMajor)?;

        let AttentionOutput { context, attn } = self.dot_attn.attend(&query, &value)?;
        let context = merge_heads(&context, batch, HeadLayout::BatchMajor)?;
        let attn = if q_len == 1 { attn.squeeze(1)? } else { attn };
        Ok(AttentionOutput { context, attn })
    }
}

impl Parameters for CustomizingAttention {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = scoped("conv1d", self.conv1d.parameters());
        params.extend(scoped("query_proj", self.query_proj.parameters()));
        params.extend(scoped("value_proj", self.value_proj.parameters()));
        params.extend(scoped("loc_proj", self.loc_proj.parameters()));
        params.push(("bias".to_string(), &self.bias));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = scoped("conv1d", self.conv1d.parameters_mut());
        params.extend(scoped("query_proj", self.query_proj.parameters_mut()));
        params.extend(scoped("value_proj", self.value_proj.parameters_mut()));
        params.extend(scoped("loc_proj", self.loc_proj.parameters_mut()));
        params.push(("bias".to_string(), &mut self.bias));
        params
    }
}
