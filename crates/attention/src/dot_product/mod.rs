//! Dot-product attention kernels.
//!
//! [`ScaledDotProductAttention`] is the Transformer kernel used directly and
//! by [`MultiHeadAttention`](crate::multi_head::MultiHeadAttention).
//! [`DotProductAttention`] scores queries against the values themselves and
//! backs [`CustomizingAttention`](crate::location::CustomizingAttention).

pub mod plain;
pub mod scaled;

pub use plain::DotProductAttention;
pub use scaled::ScaledDotProductAttention;
