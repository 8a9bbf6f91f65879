//! Plain `Vec` arithmetic for checking module outputs against their
//! parameters, one scalar at a time.

use std::collections::HashMap;

use candle_core::Tensor;
use layers::{params::to_map, Parameters};

use super::Result;

/// Named parameters of a module, read back as nested vectors.
pub(crate) struct Weights(HashMap<String, Tensor>);

impl Weights {
    pub(crate) fn of<P: Parameters>(module: &P) -> Self {
        Self(to_map(module))
    }

    pub(crate) fn vector(&self, name: &str) -> Result<Vec<f32>> {
        Ok(self.0[name].to_vec1::<f32>()?)
    }

    pub(crate) fn matrix(&self, name: &str) -> Result<Vec<Vec<f32>>> {
        Ok(self.0[name].to_vec2::<f32>()?)
    }

    pub(crate) fn kernel(&self, name: &str) -> Result<Vec<Vec<Vec<f32>>>> {
        Ok(self.0[name].to_vec3::<f32>()?)
    }
}

/// Overwrites every parameter with distinct, non-zero values so zero-initialised
/// biases take part in the computation.
pub(crate) fn fill_parameters<P: Parameters>(module: &mut P) -> Result<()> {
    for (index, (_, slot)) in module.parameters_mut().into_iter().enumerate() {
        let shape = slot.shape().clone();
        let device = slot.device().clone();
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|i| ((i * 7 + index * 13 + 1) as f32 * 0.61).sin() * 0.5)
            .collect();
        *slot = Tensor::from_vec(data, shape, &device)?;
    }
    Ok(())
}

/// `W · x + b` with `W` laid out `(out, in)`.
pub(crate) fn linear(x: &[f32], weight: &[Vec<f32>], bias: Option<&[f32]>) -> Vec<f32> {
    weight
        .iter()
        .enumerate()
        .map(|(o, row)| {
            let dot: f32 = row.iter().zip(x).map(|(w, v)| w * v).sum();
            dot + bias.map_or(0.0, |b| b[o])
        })
        .collect()
}

/// Length-preserving 1D cross-correlation over `(in_channels, len)`.
pub(crate) fn conv1d_same(
    input: &[Vec<f32>],
    weight: &[Vec<Vec<f32>>],
    bias: &[f32],
) -> Vec<Vec<f32>> {
    let len = input.first().map_or(0, Vec::len);
    weight
        .iter()
        .zip(bias)
        .map(|(filters, b)| {
            (0..len)
                .map(|t| {
                    let mut acc = *b;
                    for (channel, taps) in input.iter().zip(filters) {
                        let pad = taps.len() / 2;
                        for (k, w) in taps.iter().enumerate() {
                            if let Some(pos) = (t + k).checked_sub(pad) {
                                if pos < len {
                                    acc += w * channel[pos];
                                }
                            }
                        }
                    }
                    acc
                })
                .collect()
        })
        .collect()
}

pub(crate) fn softmax(xs: &[f32]) -> Vec<f32> {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = xs.iter().map(|x| (x - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

pub(crate) fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {i}: {a} vs expected {e}"
        );
    }
}
