//! Linear and affine projection helpers.
//!
//! Linear layers accept inputs shaped `(.., in_dim)` of any rank >= 1 and
//! return `(.., out_dim)` with the leading dimensions preserved. Leading
//! dimensions are flattened for a single matmul and restored afterwards.
//! Weights follow the `(out_dim, in_dim)` layout so the projection computes
//! `x · Wᵀ + b`.

use candle_core::{Error, Result, Tensor};

use crate::{
    checks,
    init::{Initializer, ParamInit},
    params::Parameters,
};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a projection with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Creates a configuration for a projection without bias.
    pub fn no_bias(input_dim: usize, output_dim: usize) -> Self {
        Self {
            bias: false,
            ..Self::new(input_dim, output_dim)
        }
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with weights drawn from `init` and a zero bias.
    pub fn with_init(
        config: LinearConfig,
        init: &ParamInit,
        initializer: &mut Initializer,
    ) -> Result<Self> {
        let weight = initializer.sample((config.output_dim, config.input_dim), init)?;
        let bias = if config.bias {
            Some(initializer.sample(config.output_dim, &ParamInit::Zeros)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Builds a linear layer with the default dense-weight policy.
    pub fn with_default_init(config: LinearConfig, initializer: &mut Initializer) -> Result<Self> {
        Self::with_init(config, &ParamInit::default_weight(), initializer)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Applies the projection to the trailing dimension of `hidden`.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_last_dim("linear.input", hidden, self.config.input_dim)?;

        let dims = hidden.dims();
        let rows: usize = dims[..dims.len() - 1].iter().product();
        let mut out_dims = dims.to_vec();
        if let Some(last) = out_dims.last_mut() {
            *last = self.config.output_dim;
        }

        let weight = self.weight.to_dtype(hidden.dtype())?;
        let flat = hidden.reshape((rows, self.config.input_dim))?;
        let mut output = flat.matmul(&weight.t()?)?;

        if let Some(bias) = &self.bias {
            let bias = bias.to_dtype(hidden.dtype())?;
            output = output.broadcast_add(&bias)?;
        }

        output.reshape(out_dims)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, checks::PARAM_DTYPES)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, checks::PARAM_DTYPES)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }
}

impl Parameters for Linear {
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
