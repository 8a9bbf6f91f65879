//! Safetensors persistence for attention parameters.
//!
//! Tensors are stored under the dotted names reported by
//! [`Parameters::parameters`], so a checkpoint written by one module can be
//! restored into any module with the same configuration.

use std::{collections::HashMap, path::Path};

use candle_core::{safetensors, Device};
use layers::{params, Parameters};

use crate::core::{AttentionError, Result};

/// Writes every parameter of `module` to a safetensors file at `path`.
pub fn save_parameters<P: Parameters + ?Sized>(module: &P, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let tensors = params::to_map(module);
    if tensors.is_empty() {
        return Err(AttentionError::Checkpoint(
            "module contains no parameters to checkpoint".into(),
        ));
    }
    safetensors::save(&tensors, path)?;
    log::info!(
        "saved {} parameter tensors to {}",
        tensors.len(),
        path.display()
    );
    Ok(())
}

/// Restores every parameter of `module` from the safetensors file at `path`.
///
/// Every parameter must be present with a matching shape, and the file may
/// not carry tensors the module does not own. Values are cast to the dtype
/// and device of the parameters they replace. On error the module is left
/// unchanged.
pub fn load_parameters<P: Parameters + ?Sized>(
    module: &mut P,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    let tensors: HashMap<String, _> = safetensors::load(path, &Device::Cpu)?;

    let expected: Vec<String> = module.parameters().into_iter().map(|(name, _)| name).collect();
    let mut unused: Vec<&str> = tensors
        .keys()
        .map(String::as_str)
        .filter(|name| !expected.iter().any(|own| own == name))
        .collect();
    if !unused.is_empty() {
        unused.sort_unstable();
        return Err(AttentionError::Checkpoint(format!(
            "checkpoint contains unused parameters: {}",
            unused.join(", ")
        )));
    }

    params::load_parameters(module, &tensors)
        .map_err(|err| AttentionError::Checkpoint(err.to_string()))?;
    log::info!(
        "loaded {} parameter tensors from {}",
        expected.len(),
        path.display()
    );
    Ok(())
}
