//! Single-head location-aware attention ("Attention-Based Models for Speech
//! Recognition", Chorowski et al.).

use candle_core::Tensor;
use candle_nn::ops::sigmoid;
use layers::{
    params::scoped, Conv1d, Conv1dConfig, Initializer, Linear, LinearConfig, Parameters,
};

use super::{previous_alignment, LOCATION_KERNEL};
use crate::additive::AttentionScore;
use crate::core::{
    shapes::{dims3, expect_features, expect_non_empty, softmax},
    AttentionError, AttentionOutput, Config, LocationAttention, Result,
};

/// Location-aware attention over a single decoder step.
///
/// With `smoothing` the energies pass through a sigmoid and are divided by
/// their row sum, which spreads the alignment more evenly than a softmax.
#[derive(Debug, Clone)]
pub struct LocationAwareAttention {
    hidden_dim: usize,
    smoothing: bool,
    conv1d: Conv1d,
    query_proj: Linear,
    value_proj: Linear,
    attn_score: AttentionScore,
}

impl LocationAwareAttention {
    pub fn new(config: &Config, initializer: &mut Initializer) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_dim;
        let conv1d = Conv1d::with_default_init(
            Conv1dConfig::same(1, hidden, LOCATION_KERNEL),
            initializer,
        )?;
        let query_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let value_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let attn_score = AttentionScore::new(hidden, initializer)?;
        log::debug!(
            "location-aware attention hidden_dim={} smoothing={}",
            hidden,
            config.smoothing
        );
        Ok(Self {
            hidden_dim: hidden,
            smoothing: config.smoothing,
            conv1d,
            query_proj,
            value_proj,
            attn_score,
        })
    }

    pub fn smoothing(&self) -> bool {
        self.smoothing
    }
}

impl LocationAttention for LocationAwareAttention {
    /// `query`: `(batch, 1, hidden)`, `value`: `(batch, v_len, hidden)`,
    /// `last_attn`: `(batch, v_len)`.
    ///
    /// Returns context `(batch, hidden)` and attn `(batch, v_len)`.
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
        let last_attn = previous_alignment(
            last_attn,
            &[batch, seq_len],
            "(batch, v_len)",
            value.dtype(),
            value.device(),
        )?;
        expect_non_empty("value", value, 1)?;
        log::trace!("location-aware batch={} v_len={}", batch, seq_len);

        let query = self.query_proj.forward(query)?;
        let value = self.value_proj.forward(value)?;
        let conv_attn = self
            .conv1d
            .forward(&last_attn.unsqueeze(1)?)?
            .transpose(1, 2)?;
        let score = self
            .attn_score
            .forward(&query.broadcast_add(&value)?.add(&conv_attn)?)?;

        let attn = if self.smoothing {
            let score = sigmoid(&score)?;
            score.broadcast_div(&score.sum_keepdim(1)?)?
        } else {
            softmax(&score)?
        };

        let context = attn
            .unsqueeze(1)?
            .matmul(&value.contiguous()?)?
            .squeeze(1)?;
        Ok(AttentionOutput { context, attn })
    }
}

impl Parameters for LocationAwareAttention {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = scoped("conv1d", self.conv1d.parameters());
        params.extend(scoped("query_proj", self.query_proj.parameters()));
        params.extend(scoped("value_proj", self.value_proj.parameters()));
        params.extend(scoped("attn_score", self.attn_score.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = scoped("conv1d", self.conv1d.parameters_mut());
        params.extend(scoped("query_proj", self.query_proj.parameters_mut()));
        params.extend(scoped("value_proj", self.value_proj.parameters_mut()));
        params.extend(scoped("attn_score", self.attn_score.parameters_mut()));
        params
    }
}
