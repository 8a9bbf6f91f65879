//! Multi-head attention variants.
//!
//! * [`MultiHeadAttention`]: Transformer attention over head-major flattened
//!   heads, delegating each head to
//!   [`ScaledDotProductAttention`](crate::dot_product::ScaledDotProductAttention).
//! * [`RelativeMultiHeadAttention`]: Transformer-XL attention with learned
//!   content/position biases and relative positional scores.

pub mod relative;
pub mod standard;

pub use relative::{relative_shift, RelativeMultiHeadAttention};
pub use standard::MultiHeadAttention;
