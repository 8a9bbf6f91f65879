//! Named parameter access for checkpointing and external optimisers.
//!
//! Layers expose their tensors through [`Parameters`] using dotted names
//! (`query_proj.weight`, `conv1d.bias`, ...). Composite modules prefix the
//! names of their children with [`scoped`] so the full list is stable and
//! unique.

use std::collections::HashMap;

use candle_core::{Error, Result, Tensor};

/// Access to the learnable tensors owned by a module.
pub trait Parameters {
    /// Returns every parameter with its dotted name.
    fn parameters(&self) -> Vec<(String, &Tensor)>;

    /// Mutable counterpart of [`Parameters::parameters`], in the same order.
    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)>;

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters()
            .iter()
            .map(|(_, tensor)| tensor.elem_count())
            .sum()
    }
}

/// Prefixes every name in `params` with `scope.`.
pub fn scoped<T>(scope: &str, params: Vec<(String, T)>) -> Vec<(String, T)> {
    params
        .into_iter()
        .map(|(name, tensor)| (format!("{scope}.{name}"), tensor))
        .collect()
}

/// Clones the named parameters into an owned map.
pub fn to_map<P: Parameters + ?Sized>(module: &P) -> HashMap<String, Tensor> {
    module
        .parameters()
        .into_iter()
        .map(|(name, tensor)| (name, tensor.clone()))
        .collect()
}

/// Replaces every parameter of `module` with the entry of the same name.
///
/// Incoming tensors are cast to the dtype and device of the parameter they
/// replace. Missing names and shape mismatches are rejected before anything
/// is written, so a failed load leaves the module untouched.
pub fn load_parameters<P: Parameters + ?Sized>(
    module: &mut P,
    tensors: &HashMap<String, Tensor>,
) -> Result<()> {
    let mut staged = Vec::new();
    for (name, current) in module.parameters() {
        let incoming = tensors
            .get(&name)
            .ok_or_else(|| Error::Msg(format!("missing parameter `{name}`")))?;
        if incoming.dims() != current.dims() {
            return Err(Error::Msg(format!(
                "parameter `{name}`: expected shape {:?}, got {:?}",
                current.dims(),
                incoming.dims()
            )));
        }
        let value = incoming
            .to_dtype(current.dtype())?
            .to_device(current.device())?;
        staged.push(value);
    }

    let count = staged.len();
    for ((_, slot), value) in module.parameters_mut().into_iter().zip(staged) {
        *slot = value;
    }
    log::debug!("replaced {} parameter tensors", count);
    Ok(())
}
