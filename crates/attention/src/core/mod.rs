//! Core traits and types shared across attention implementations.
//!
//! Inputs follow the `(batch, len, features)` layout. Every variant returns
//! the context tensor together with the attention distribution, which sums to
//! one along the last (source) axis.

pub mod config;
pub mod errors;
pub mod shapes;
#[cfg(test)]
pub(crate) mod testing;

use candle_core::Tensor;

pub use config::Config;
pub use errors::{AttentionError, Result};
pub use shapes::{merge_heads, split_heads, HeadLayout};

/// Context vectors together with the alignment that produced them.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    pub context: Tensor,
    pub attn: Tensor,
}

/// Attention over explicit query, key and value tensors.
///
/// * `query`: `(batch, q_len, d)`, `key`: `(batch, k_len, d)`,
///   `value`: `(batch, k_len, d_v)`.
/// * `mask`, when present, is a `u8` tensor shaped `(batch, q_len, k_len)`;
///   non-zero entries are excluded from the distribution.
pub trait Attention {
    fn attend(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput>;
}

/// Step-wise attention conditioned on the previous step's alignment.
///
/// The module keeps no state between calls: the alignment returned by one
/// step is passed back as `last_attn` by the decoding loop. `None` starts
/// from an all-zero alignment.
pub trait LocationAttention {
    fn attend_step(
        &self,
        query: &Tensor,
        value: &Tensor,
        last_attn: Option<&Tensor>,
    ) -> Result<AttentionOutput>;
}

/// Runs `queries` through `attention` in order, feeding each alignment back
/// as the next step's `last_attn`.
pub fn unroll<A: LocationAttention + ?Sized>(
    attention: &A,
    queries: &[Tensor],
    value: &Tensor,
) -> Result<Vec<AttentionOutput>> {
    let mut outputs: Vec<AttentionOutput> = Vec::with_capacity(queries.len());
    for query in queries {
        let last_attn = outputs.last().map(|out| &out.attn);
        let step = attention.attend_step(query, value, last_attn)?;
        outputs.push(step);
    }
    Ok(outputs)
}
