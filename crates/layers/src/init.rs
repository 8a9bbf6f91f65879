//! Explicit parameter initialisation.
//!
//! Every learnable tensor is sampled through an [`Initializer`], which owns a
//! seeded RNG together with the target device and dtype. Sampling happens in
//! `f32` on the host and is cast afterwards, so two initialisers built from the
//! same seed produce bit-identical parameters regardless of the device.

use candle_core::{DType, Device, Error, Result, Shape, Tensor};
use rand::{
    distributions::{Distribution, Uniform},
    rngs::StdRng,
    Rng, SeedableRng,
};

use crate::checks;

/// Supported initialisation policies for attention parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Kaiming/He uniform initialisation.
    ///
    /// `negative_slope = sqrt(5)` reproduces the customary default for dense
    /// and convolution weights, i.e. `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    KaimingUniform { negative_slope: f64 },
    /// Plain uniform sampling in `[low, high)`.
    Uniform { low: f32, high: f32 },
    /// All zeros.
    Zeros,
}

impl ParamInit {
    /// Default policy for dense and convolution weights.
    pub fn default_weight() -> Self {
        ParamInit::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }

    /// Symmetric uniform range `[-bound, bound)`.
    pub fn symmetric(bound: f32) -> Self {
        ParamInit::Uniform {
            low: -bound,
            high: bound,
        }
    }

    fn bounds(&self, dims: &[usize]) -> Result<Option<(f32, f32)>> {
        let bounds = match self {
            ParamInit::XavierUniform => {
                let (fan_in, fan_out) = fans(dims)?;
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt() as f32;
                Some((-bound, bound))
            }
            ParamInit::KaimingUniform { negative_slope } => {
                let (fan_in, _) = fans(dims)?;
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = ((3.0f64).sqrt() * gain / fan_in.sqrt()) as f32;
                Some((-bound, bound))
            }
            ParamInit::Uniform { low, high } => {
                if !(low < high) || !low.is_finite() || !high.is_finite() {
                    return Err(Error::Msg(format!(
                        "uniform init requires finite low < high, got [{low}, {high})"
                    )));
                }
                Some((*low, *high))
            }
            ParamInit::Zeros => None,
        };
        Ok(bounds)
    }
}

/// Fan-in / fan-out following the `(out, in, *receptive_field)` convention.
fn fans(dims: &[usize]) -> Result<(f64, f64)> {
    if dims.len() < 2 {
        return Err(Error::Msg(format!(
            "fan computation needs at least 2 dimensions, got {:?}",
            dims
        )));
    }
    let receptive: usize = dims[2..].iter().product();
    let fan_in = (dims[1] * receptive) as f64;
    let fan_out = (dims[0] * receptive) as f64;
    if fan_in == 0.0 || fan_out == 0.0 {
        return Err(Error::Msg(format!(
            "fan computation on empty dimensions {:?}",
            dims
        )));
    }
    Ok((fan_in, fan_out))
}

/// Seeded source of parameters bound to a device and dtype.
#[derive(Debug)]
pub struct Initializer {
    rng: StdRng,
    device: Device,
    dtype: DType,
}

impl Initializer {
    /// Deterministic initialiser; identical seeds yield identical parameters.
    pub fn seeded(seed: u64, device: &Device, dtype: DType) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
            dtype,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Derives an independent RNG, used to seed stochastic layers such as dropout.
    pub fn fork_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.gen())
    }

    /// Samples a parameter tensor of `shape` following `init`.
    pub fn sample<S: Into<Shape>>(&mut self, shape: S, init: &ParamInit) -> Result<Tensor> {
        checks_dtype(self.dtype)?;
        let shape = shape.into();
        let dims = shape.dims().to_vec();
        let tensor = match init.bounds(&dims)? {
            None => Tensor::zeros(dims, DType::F32, &self.device)?,
            Some((low, high)) => {
                let dist = Uniform::new(low, high);
                let data: Vec<f32> = (0..shape.elem_count())
                    .map(|_| dist.sample(&mut self.rng))
                    .collect();
                Tensor::from_vec(data, dims, &self.device)?
            }
        };
        if self.dtype == DType::F32 {
            Ok(tensor)
        } else {
            tensor.to_dtype(self.dtype)
        }
    }
}

fn checks_dtype(dtype: DType) -> Result<()> {
    if checks::PARAM_DTYPES.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "parameters must use a float dtype, got {:?}",
            dtype
        )))
    }
}
