//! Additive (Bahdanau) attention and the shared energy scorer.
//!
//! [`AttentionScore`] maps combined query/key features to one scalar energy
//! per position and is reused by the location-aware variants.

use candle_core::Tensor;
use layers::{
    params::scoped, Initializer, Linear, LinearConfig, ParamInit, Parameters,
};

use crate::core::{
    shapes::{dims3, expect_features, expect_non_empty, softmax},
    Attention, AttentionError, AttentionOutput, Config, Result,
};
use crate::masks::{expect_mask, masked_fill};

/// Range of the uniform initialisation used for learned score biases.
pub(crate) const SCORE_BIAS_RANGE: f32 = 0.1;

/// `energy = proj(tanh(x + bias))` over the trailing feature axis.
#[derive(Debug, Clone)]
pub struct AttentionScore {
    hidden_dim: usize,
    bias: Tensor,
    proj: Linear,
}

impl AttentionScore {
    pub fn new(hidden_dim: usize, initializer: &mut Initializer) -> Result<Self> {
        if hidden_dim == 0 {
            return Err(AttentionError::config(
                "attention score requires a non-zero hidden_dim",
            ));
        }
        let bias = initializer.sample(hidden_dim, &ParamInit::symmetric(SCORE_BIAS_RANGE))?;
        let proj = Linear::with_default_init(LinearConfig::new(hidden_dim, 1), initializer)?;
        Ok(Self {
            hidden_dim,
            bias,
            proj,
        })
    }

    /// `(.., hidden)` → `(..)`: one energy per leading position.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        expect_features("attention_score.input", x, self.hidden_dim)?;
        let bias = self.bias.to_dtype(x.dtype())?;
        let energy = self.proj.forward(&x.broadcast_add(&bias)?.tanh()?)?;
        Ok(energy.squeeze(energy.rank() - 1)?)
    }
}

impl Parameters for AttentionScore {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = vec![("bias".to_string(), &self.bias)];
        params.extend(scoped("proj", self.proj.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = vec![("bias".to_string(), &mut self.bias)];
        params.extend(scoped("proj", self.proj.parameters_mut()));
        params
    }
}

/// Bahdanau attention: `score(q, k) = wᵀ tanh(W_q q + W_k k + b)`.
#[derive(Debug, Clone)]
pub struct AdditiveAttention {
    hidden_dim: usize,
    query_proj: Linear,
    key_proj: Linear,
    attn_score: AttentionScore,
}

impl AdditiveAttention {
    pub fn new(config: &Config, initializer: &mut Initializer) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_dim;
        let query_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let key_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let attn_score = AttentionScore::new(hidden, initializer)?;
        log::debug!("additive attention hidden_dim={}", hidden);
        Ok(Self {
            hidden_dim: hidden,
            query_proj,
            key_proj,
            attn_score,
        })
    }
}

impl Attention for AdditiveAttention {
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
                format!("({batch}, {k_len}, d_v)"),
                value.dims(),
            ));
        }
        expect_non_empty("key", key, 1)?;
        log::trace!("additive batch={} q_len={} k_len={}", batch, q_len, k_len);

        // (B, Q, 1, D) + (B, 1, K, D) -> (B, Q, K, D)
        let query = self.query_proj.forward(query)?.unsqueeze(2)?;
        let key = self.key_proj.forward(key)?.unsqueeze(1)?;
        let scores = self.attn_score.forward(&query.broadcast_add(&key)?)?;

        let scores = match mask {
            Some(mask) => {
                expect_mask(mask, &[batch, q_len, k_len], "(batch, q_len, k_len)")?;
                masked_fill(&scores, mask)?
            }
            None => scores,
        };

        let attn = softmax(&scores)?;
        let context = attn.matmul(&value.contiguous()?)?;
        Ok(AttentionOutput { context, attn })
    }
}

impl Parameters for AdditiveAttention {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = scoped("query_proj", self.query_proj.parameters());
        params.extend(scoped("key_proj", self.key_proj.parameters()));
        params.extend(scoped("attn_score", self.attn_score.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = scoped("query_proj", self.query_proj.parameters_mut());
        params.extend(scoped("key_proj", self.key_proj.parameters_mut()));
        params.extend(scoped("attn_score", self.attn_score.parameters_mut()));
        params
    }
}
