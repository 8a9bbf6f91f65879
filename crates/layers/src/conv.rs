//! 1D convolution over `(batch, channels, length)` inputs.
//!
//! Weight: `[out_channels, in_channels, kernel_size]`
//! Input:  `[batch, in_channels, length]`
//! Output: `[batch, out_channels, length_out]`
//!
//! Stride and dilation are fixed at one; padding is symmetric.

use candle_core::{Error, Result, Tensor};

use crate::{
    checks,
    init::{Initializer, ParamInit},
    params::Parameters,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv1dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub padding: usize,
    pub bias: bool,
}

impl Conv1dConfig {
    /// Length-preserving configuration: odd kernel with `kernel_size / 2` padding.
    pub fn same(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            padding: kernel_size / 2,
            bias: true,
        }
    }

    fn output_len(&self, length: usize) -> Option<usize> {
        (length + 2 * self.padding)
            .checked_sub(self.kernel_size)
            .map(|span| span + 1)
    }
}

#[derive(Debug, Clone)]
pub struct Conv1d {
    config: Conv1dConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Conv1d {
    pub fn new(config: Conv1dConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if config.kernel_size == 0 || config.in_channels == 0 || config.out_channels == 0 {
            return Err(Error::Msg(format!(
                "conv1d requires non-zero channels and kernel, got {:?}",
                config
            )));
        }
        checks::expect_shape(
            "conv1d.weight",
            &weight,
            &[config.out_channels, config.in_channels, config.kernel_size],
        )?;
        checks::expect_dtype_in("conv1d.weight", &weight, checks::PARAM_DTYPES)?;
        match (config.bias, &bias) {
            (true, Some(b)) => checks::expect_shape("conv1d.bias", b, &[config.out_channels])?,
            (false, None) => {}
            _ => {
                return Err(Error::Msg(
                    "conv1d bias presence does not match its config".into(),
                ))
            }
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Samples weight and bias with the default `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` range.
    pub fn with_default_init(config: Conv1dConfig, initializer: &mut Initializer) -> Result<Self> {
        let shape = (config.out_channels, config.in_channels, config.kernel_size);
        let weight = initializer.sample(shape, &ParamInit::default_weight())?;
        let bias = if config.bias {
            let fan_in = (config.in_channels * config.kernel_size) as f32;
            Some(initializer.sample(
                config.out_channels,
                &ParamInit::symmetric(1.0 / fan_in.sqrt()),
            )?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &Conv1dConfig {
        &self.config
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (_, channels, length) = input.dims3()?;
        if channels != self.config.in_channels {
            return Err(Error::Msg(format!(
                "conv1d expects {} input channels, got {:?}",
                self.config.in_channels,
                input.dims()
            )));
        }
        if self.config.output_len(length).is_none() {
            return Err(Error::Msg(format!(
                "conv1d input length {length} too short for kernel {}",
                self.config.kernel_size
            )));
        }

        let weight = self.weight.to_dtype(input.dtype())?;
        let output = input
            .contiguous()?
            .conv1d(&weight, self.config.padding, 1, 1, 1)?;
        match &self.bias {
            Some(bias) => {
                let bias = bias
                    .to_dtype(input.dtype())?
                    .reshape((1, self.config.out_channels, 1))?;
                output.broadcast_add(&bias)
            }
            None => Ok(output),
        }
    }
}

impl Parameters for Conv1d {
    fn parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = vec![("weight".to_string(), &self.weight)];
        if let Some(bias) = &self.bias {
            params.push(("bias".to_string(), bias));
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = vec![("weight".to_string(), &mut self.weight)];
        if let Some(bias) = &mut self.bias {
            params.push(("bias".to_string(), bias));
        }
        params
    }
}
