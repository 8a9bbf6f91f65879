//! Inverted dropout with an explicit random source.
//!
//! Dropout never consults a global training flag: callers pass `train` on
//! every call, and the mask is drawn from the RNG injected at construction.
//! Kept activations are scaled by `1 / (1 - p)` so evaluation needs no
//! rescaling.

use std::{fmt, sync::Mutex};

use candle_core::{DType, Error, Result, Tensor};
use rand::{rngs::StdRng, Rng};

/// Dropout policy: disabled, or active with a probability and RNG.
enum DropoutMode {
    /// Dropout is disabled (probability absent or zero).
    Disabled,
    /// Dropout is active and samples masks from `rng`.
    Enabled { probability: f32, rng: Mutex<StdRng> },
}

impl fmt::Debug for DropoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropoutMode::Disabled => f.write_str("Disabled"),
            DropoutMode::Enabled { probability, .. } => f
                .debug_struct("Enabled")
                .field("probability", probability)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub struct Dropout {
    mode: DropoutMode,
}

impl Dropout {
    /// Builds dropout from an optional probability; `None` or `0.0` disables it.
    ///
    /// Probabilities outside `[0, 1)` are rejected.
    pub fn new(probability: Option<f32>, rng: StdRng) -> Result<Self> {
        let mode = match probability {
            None => DropoutMode::Disabled,
            Some(p) if !(0.0..1.0).contains(&p) => {
                return Err(Error::Msg(format!(
                    "dropout probability must be in [0, 1), got {p}"
                )))
            }
            Some(p) if p == 0.0 => DropoutMode::Disabled,
            Some(p) => DropoutMode::Enabled {
                probability: p,
                rng: Mutex::new(rng),
            },
        };
        Ok(Self { mode })
    }

    pub fn probability(&self) -> f32 {
        match &self.mode {
            DropoutMode::Disabled => 0.0,
            DropoutMode::Enabled { probability, .. } => *probability,
        }
    }

    /// Zeroes elements with the configured probability when `train` is set.
    pub fn forward(&self, tensor: &Tensor, train: bool) -> Result<Tensor> {
        let (probability, rng) = match (&self.mode, train) {
            (DropoutMode::Enabled { probability, rng }, true) => (*probability, rng),
            _ => return Ok(tensor.clone()),
        };
        let keep_prob = 1.0 - probability;
        let total = tensor.elem_count();
        log::trace!("dropout p={} elements={}", probability, total);
        let mask_data: Vec<f32> = {
            let mut rng = rng
                .lock()
                .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
            (0..total)
                .map(|_| {
                    if rng.gen::<f32>() < keep_prob {
                        1.0 / keep_prob
                    } else {
                        0.0
                    }
                })
                .collect()
        };
        let mask = Tensor::from_vec(mask_data, tensor.shape(), tensor.device())?;
        let mask = if tensor.dtype() == DType::F32 {
            mask
        } else {
            mask.to_dtype(tensor.dtype())?
        };
        tensor.mul(&mask)
    }
}
