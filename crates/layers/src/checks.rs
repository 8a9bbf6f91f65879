//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected shape {:?}, got {:?}",
            expected, actual
        )))
    }
}

/// Ensures a tensor has the requested number of dimensions.
pub fn expect_rank(name: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let dims = tensor.dims();
    if dims.len() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected rank {rank}, got {:?}",
            dims
        )))
    }
}

/// Validates that the trailing (feature) dimension equals `features`.
pub fn expect_last_dim(name: &str, tensor: &Tensor, features: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&last) if last == features => Ok(()),
        _ => Err(Error::Msg(format!(
            "{name}: expected (.., {features}) layout, got {:?}",
            tensor.dims()
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(name: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{name}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

/// Float dtypes accepted for learnable parameters.
pub const PARAM_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32, DType::F64];

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn shape_and_rank_checks_report_tensor_name() -> Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        expect_shape("w", &tensor, &[2, 3])?;
        expect_rank("w", &tensor, 2)?;
        expect_last_dim("w", &tensor, 3)?;

        let err = expect_shape("w", &tensor, &[3, 2]).unwrap_err();
        assert!(err.to_string().contains("w: expected shape [3, 2]"));
        assert!(expect_rank("w", &tensor, 3).is_err());
        assert!(expect_last_dim("w", &tensor, 2).is_err());
        Ok(())
    }

    #[test]
    fn dtype_check_rejects_integer_parameters() -> Result<()> {
        let tensor = Tensor::zeros(4, DType::U8, &Device::Cpu)?;
        assert!(expect_dtype_in("bias", &tensor, PARAM_DTYPES).is_err());
        let tensor = tensor.to_dtype(DType::F32)?;
        expect_dtype_in("bias", &tensor, PARAM_DTYPES)
    }
}
