//! Attention mechanisms as reusable layers on Candle.
//!
//! Every module consumes `(batch, len, features)` tensors and returns the
//! context vectors together with the attention distribution, which sums to
//! one over the source axis:
//!
//! * [`ScaledDotProductAttention`] and [`DotProductAttention`]
//! * [`AdditiveAttention`] (Bahdanau)
//! * [`LocationAwareAttention`], [`MultiHeadLocationAwareAttention`] and
//!   [`CustomizingAttention`] for step-wise decoders, driven through
//!   [`LocationAttention`] and [`unroll`]
//! * [`MultiHeadAttention`] and [`RelativeMultiHeadAttention`]
//!
//! Modules are built from a shared [`Config`] and a
//! [`layers::Initializer`], which fixes the seed, device and dtype of every
//! parameter. Masks are `u8` tensors whose non-zero entries are excluded;
//! see [`masks`]. Parameters can be persisted with [`checkpoint`].

pub mod additive;
pub mod checkpoint;
pub mod core;
pub mod dot_product;
pub mod location;
pub mod masks;
pub mod multi_head;

pub use additive::{AdditiveAttention, AttentionScore};
pub use crate::core::{
    unroll, Attention, AttentionError, AttentionOutput, Config, HeadLayout, LocationAttention,
    Result,
};
pub use dot_product::{DotProductAttention, ScaledDotProductAttention};
pub use location::{CustomizingAttention, LocationAwareAttention, MultiHeadLocationAwareAttention};
pub use multi_head::{relative_shift, MultiHeadAttention, RelativeMultiHeadAttention};
