//! Building blocks for attention layers.
//!
//! Every layer owns its parameters as plain Candle tensors and is created
//! through an explicit [`init::Initializer`], so initialisation policy, seed,
//! device and dtype are visible at the call site. Parameters are exposed by
//! name through [`params::Parameters`] for checkpointing and external
//! optimisers.

pub mod checks;
pub mod conv;
pub mod dropout;
pub mod init;
pub mod linear;
pub mod params;

pub use conv::{Conv1d, Conv1dConfig};
pub use dropout::Dropout;
pub use init::{Initializer, ParamInit};
pub use linear::{Linear, LinearConfig};
pub use params::Parameters;
