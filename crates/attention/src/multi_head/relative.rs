//! Relative multi-head attention (Transformer-XL, Dai et al.).
//!
//! Scores combine a content term `(q + u) · kᵀ` with a positional term
//! `(q + v) · posᵀ` realigned by [`relative_shift`], where `u` and `v` are
//! learned per-head biases. The sum is divided by `sqrt(hidden_dim)`.
//! Dropout on the attention weights only runs when `train` is set.

use candle_core::Tensor;
use layers::{
    params::scoped, Dropout, Initializer, Linear, LinearConfig, ParamInit, Parameters,
};

use crate::core::{
    shapes::{dims3, expect_features, expect_non_empty, softmax},
    AttentionError, Config, Result,
};
use crate::masks::{masked_fill, MASK_DTYPE};

/// Realigns positional scores so column `j` of row `i` refers to the
/// relative distance between query `i` and key `j`.
///
/// `(batch, heads, l1, l2)`: a zero column is prepended, the result is
/// viewed as `(batch, heads, l2 + 1, l1)`, its first row dropped and the
/// remainder viewed back as `(batch, heads, l1, l2)`.
pub fn relative_shift(pos_score: &Tensor) -> Result<Tensor> {
    let (batch, heads, l1, l2) = match pos_score.dims() {
        &[b, h, l1, l2] => (b, h, l1, l2),
        other => {
            return Err(AttentionError::shape(
                "pos_score",
                "(batch, heads, l1, l2)",
                other,
            ))
        }
    };
    let zeros = Tensor::zeros((batch, heads, l1, 1), pos_score.dtype(), pos_score.device())?;
    let padded = Tensor::cat(&[&zeros, pos_score], 3)?;
    let shifted = padded
        .reshape((batch, heads, l2 + 1, l1))?
        .narrow(2, 1, l2)?
        .contiguous()?
        .reshape((batch, heads, l1, l2))?;
    Ok(shifted)
}

#[derive(Debug)]
pub struct RelativeMultiHeadAttention {
    hidden_dim: usize,
    num_heads: usize,
    head_dim: usize,
    sqrt_dim: f64,
    query_proj: Linear,
    key_proj: Linear,
    value_proj: Linear,
    pos_proj: Linear,
    u_bias: Tensor,
    v_bias: Tensor,
    out_proj: Linear,
    dropout: Dropout,
}

impl RelativeMultiHeadAttention {
    pub fn new(config: &Config, initializer: &mut Initializer) -> Result<Self> {
        let head_dim = config.head_dim()?;
        let hidden = config.hidden_dim;
        let heads = config.num_heads;

        let query_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        let key_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        let value_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        let pos_proj =
            Linear::with_default_init(LinearConfig::no_bias(hidden, hidden), initializer)?;
        let u_bias = initializer.sample((heads, head_dim), &ParamInit::XavierUniform)?;
        let v_bias = initializer.sample((heads, head_dim), &ParamInit::XavierUniform)?;
        let out_proj = Linear::with_default_init(LinearConfig::new(hidden, hidden), initializer)?;
        let dropout = Dropout::new(config.dropout_p, initializer.fork_rng())
            .map_err(|err| AttentionError::config(err.to_string()))?;

        log::debug!(
            "relative multi-head attention hidden_dim={} heads={} dropout={:?}",
            hidden,
            heads,
            config.dropout_p
        );
        Ok(Self {
            hidden_dim: hidden,
            num_heads: heads,
            head_dim,
            sqrt_dim: (hidden as f64).sqrt(),
            query_proj,
            key_proj,
            value_proj,
            pos_proj,
            u_bias,
            v_bias,
            out_proj,
            dropout,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Attention output `(batch, t1, hidden)`.
    ///
    /// * `query`: `(batch, t1, hidden)`
    /// * `key`, `value`, `pos_embedding`: `(batch, t2, hidden)`
    /// * `mask`: `(batch, 1, t2)` or `(batch, t1, t2)`, non-zero entries masked
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        pos_embedding: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        self.forward_with_attention(query, key, value, pos_embedding, mask, train)
            .map(|(output, _)| output)
    }

    /// Like [`forward`](Self::forward), also returning the
    /// `(batch, heads, t1, t2)` attention weights after dropout.
    pub fn forward_with_attention(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        pos_embedding: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (batch, t1, t2) = self.check_inputs(query, key, value, pos_embedding)?;
        let mask = mask
            .map(|mask| self.check_mask(mask, batch, t1, t2))
            .transpose()?;
        log::trace!(
            "relative multi-head batch={} heads={} t1={} t2={} train={}",
            batch,
            self.num_heads,
            t1,
            t2,
            train
        );

        // (B, T, H, d)
        let query = self.project(&self.query_proj, query)?;
        // (B, H, T, d)
        let key = self.project(&self.key_proj, key)?.transpose(1, 2)?;
        let value = self.project(&self.value_proj, value)?.transpose(1, 2)?.contiguous()?;
        let pos = self.project(&self.pos_proj, pos_embedding)?.transpose(1, 2)?;

        let u_bias = self.u_bias.to_dtype(query.dtype())?;
        let v_bias = self.v_bias.to_dtype(query.dtype())?;

        // (B, H, T1, d) x (B, H, d, T2) -> (B, H, T1, T2)
        let content_query = query.broadcast_add(&u_bias)?.transpose(1, 2)?.contiguous()?;
        let content_score = content_query.matmul(&key.transpose(2, 3)?.contiguous()?)?;

        let pos_query = query.broadcast_add(&v_bias)?.transpose(1, 2)?.contiguous()?;
        let pos_score = pos_query.matmul(&pos.transpose(2, 3)?.contiguous()?)?;
        let pos_score = relative_shift(&pos_score)?;

        let score = content_score
            .add(&pos_score)?
            .affine(1.0 / self.sqrt_dim, 0.0)?;
        let score = match mask {
            Some(mask) => masked_fill(&score, &mask.unsqueeze(1)?)?,
            None => score,
        };

        let attn = softmax(&score)?;
        let attn = self.dropout.forward(&attn, train)?;

        let context = attn
            .matmul(&value)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, t1, self.hidden_dim))?;
        let output = self.out_proj.forward(&context)?;
        Ok((output, attn))
    }

    /// `(batch, len, hidden)` -> `(batch, len, heads, head_dim)`.
    fn project(&self, proj: &Linear, x: &Tensor) -> Result<Tensor> {
        let (batch, len, _) = x.dims3()?;
        Ok(proj
            .forward(x)?
            .reshape((batch, len, self.num_heads, self.head_dim))?)
    }

    fn check_inputs(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        pos_embedding: &Tensor,
    ) -> Result<(usize, usize, usize)> {
        let (batch, t1, _) = dims3("query", query)?;
        let (_, t2, _) = dims3("key", key)?;
        expect_non_empty("key", key, 1)?;
        for (name, tensor) in [
            ("query", query),
            ("key", key),
            ("value", value),
            ("pos_embedding", pos_embedding),
        ] {
            expect_features(name, tensor, self.hidden_dim)?;
        }
        if key.dim(0)? != batch {
            return Err(AttentionError::shape(
                "key",
                format!("({batch}, t2, {})", self.hidden_dim),
                key.dims(),
            ));
        }
        if dims3("value", value)? != (batch, t2, self.hidden_dim) {
            return Err(AttentionError::shape(
                "value",
                format!("({batch}, {t2}, {})", self.hidden_dim),
                value.dims(),
            ));
        }
        if dims3("pos_embedding", pos_embedding)? != (batch, t2, self.hidden_dim) {
            return Err(AttentionError::shape(
                "pos_embedding",
                format!("({batch}, {t2}, {})", self.hidden_dim),
                pos_embedding.dims(),
            ));
        }
        Ok((batch, t1, t2))
    }

    fn check_mask(&self, mask: &Tensor, batch: usize, t1: usize, t2: usize) -> Result<Tensor> {
        if mask.dtype() != MASK_DTYPE {
            return Err(AttentionError::UnsupportedDType {
                tensor: "mask",
                dtype: mask.dtype(),
            });
        }
        match mask.dims() {
            &[b, rows, cols] if b == batch && (rows == 1 || rows == t1) && cols == t2 => {
                Ok(mask.clone())
            }
            other => Err(AttentionError::shape(
                "mask",
                format!("({batch}, 1, {t2}) or ({batch}, {t1}, {t2})"),
                other,
            )),
        }
    }
}

impl Parameters for RelativeMultiHeadAttention {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = scoped("query_proj", self.query_proj.parameters());
        params.extend(scoped("key_proj", self.key_proj.parameters()));
        params.extend(scoped("value_proj", self.value_proj.parameters()));
        params.extend(scoped("pos_proj", self.pos_proj.parameters()));
        params.push(("u_bias".to_string(), &self.u_bias));
        params.push(("v_bias".to_string(), &self.v_bias));
        params.extend(scoped("out_proj", self.out_proj.parameters()));
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = scoped("query_proj", self.query_proj.parameters_mut());
        params.extend(scoped("key_proj", self.key_proj.parameters_mut()));
        params.extend(scoped("value_proj", self.value_proj.parameters_mut()));
        params.extend(scoped("pos_proj", self.pos_proj.parameters_mut()));
        params.push(("u_bias".to_string(), &mut self.u_bias));
        params.push(("v_bias".to_string(), &mut self.v_bias));
        params.extend(scoped("out_proj", self.out_proj.parameters_mut()));
        params
    }
}
