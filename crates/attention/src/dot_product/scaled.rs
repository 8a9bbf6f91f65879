//! Scaled dot-product attention from "Attention Is All You Need".
//!
//! `score = query · keyᵀ / sqrt(d)`, masked positions are filled with
//! [`MASK_FILL_VALUE`](crate::masks::MASK_FILL_VALUE), the softmax runs over
//! keys and `context = softmax(score) · value`.

use candle_core::Tensor;

use crate::core::{
    shapes::{dims3, expect_non_empty, softmax},
    Attention, AttentionError, AttentionOutput, Result,
};
use crate::masks::{expect_mask, masked_fill};

/// Stateless scaled dot-product kernel over `(batch, len, d)` tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledDotProductAttention;

impl ScaledDotProductAttention {
    pub fn new() -> Self {
        Self
    }
}

impl Attention for ScaledDotProductAttention {
    fn attend(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<AttentionOutput> {
        let (batch, q_len, dim) = dims3("query", query)?;
        let (key_batch, k_len, key_dim) = dims3("key", key)?;
        let (value_batch, v_len, _) = dims3("value", value)?;

        if dim == 0 {
            return Err(AttentionError::shape("query", "non-zero feature dim", query.dims()));
        }
        if key_batch != batch || key_dim != dim {
            return Err(AttentionError::shape(
                "key",
                format!("({batch}, k_len, {dim})"),
                key.dims(),
            ));
        }
        if value_batch != batch || v_len != k_len {
            return Err(AttentionError::shape(
                "value",
                format!("({batch}, {k_len}, d_v)"),
                value.dims(),
            ));
        }
        expect_non_empty("key", key, 1)?;
        log::trace!(
            "scaled_dot_product batch={} q_len={} k_len={} dim={}",
            batch,
            q_len,
            k_len,
            dim
        );

        let key_t = key.transpose(1, 2)?.contiguous()?;
        let scores = query
            .contiguous()?
            .matmul(&key_t)?
            .affine(1.0 / (dim as f64).sqrt(), 0.0)?;

        let scores = match mask {
            Some(mask) => {
                expect_mask(mask, &[batch, q_len, k_len], "(batch, q_len, k_len)")?;
                masked_fill(&scores, mask)?
            }
            None => scores,
        };

        let attn = softmax(&scores)?;
        let context = attn.matmul(&value.contiguous()?)?;
        Ok(AttentionOutput { context, attn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::build_causal_mask;
    use candle_core::{DType, Device};

    fn build_inputs(device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 * 0.1).collect();
        let q = Tensor::from_vec(data.clone(), (2, 4, 8), device)?;
        let k = Tensor::from_vec(data.iter().rev().copied().collect::<Vec<_>>(), (2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (2, 4, 8), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<Vec<Vec<Vec<f32>>>> {
        let q = q.to_vec3::<f32>()?;
        let k = k.to_vec3::<f32>()?;
        let v = v.to_vec3::<f32>()?;
        let scale = (q[0][0].len() as f32).sqrt();
        let mut out = Vec::new();
        for b in 0..q.len() {
            let mut rows = Vec::new();
            for qi in &q[b] {
                let scores: Vec<f32> = k[b]
                    .iter()
                    .map(|kj| qi.iter().zip(kj).map(|(a, b)| a * b).sum::<f32>() / scale)
                    .collect();
                let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
                let denom: f32 = exps.iter().sum();
                let mut row = vec![0f32; v[b][0].len()];
                for (weight, vj) in exps.iter().zip(&v[b]) {
                    for (acc, x) in row.iter_mut().zip(vj) {
                        *acc += weight / denom * x;
                    }
                }
                rows.push(row);
            }
            out.push(rows);
        }
        Ok(out)
    }

    #[test]
    fn matches_naive_attention() -> Result<()> {
        let (q, k, v) = build_inputs(&Device::Cpu)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, None)?;
        let expected = naive_attention(&q, &k, &v)?;
        let actual = out.context.to_vec3::<f32>()?;
        for (a, e) in actual.iter().flatten().flatten().zip(expected.iter().flatten().flatten()) {
            assert!((a - e).abs() < 1e-5, "{a} vs {e}");
        }
        assert_eq!(out.attn.dims(), &[2, 4, 4]);
        Ok(())
    }

    #[test]
    fn rows_sum_to_one_and_masked_keys_get_zero() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 2, 4, 4)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, Some(&mask))?;

        let attn = out.attn.to_vec3::<f32>()?;
        let mask = mask.to_vec3::<u8>()?;
        for (attn_rows, mask_rows) in attn.iter().zip(&mask) {
            for (row, mask_row) in attn_rows.iter().zip(mask_rows) {
                assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
                for (weight, masked) in row.iter().zip(mask_row) {
                    if *masked != 0 {
                        assert_eq!(*weight, 0.0);
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn fully_masked_row_stays_finite() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = Tensor::ones((2, 4, 4), DType::U8, &device)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, Some(&mask))?;
        let attn = out.attn.flatten_all()?.to_vec1::<f32>()?;
        assert!(attn.iter().all(|w| (w - 0.25).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn rejects_mismatched_shapes() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 4, 8), DType::F32, &device)?;
        let k = Tensor::zeros((1, 5, 6), DType::F32, &device)?;
        let v = Tensor::zeros((1, 5, 8), DType::F32, &device)?;
        let err = ScaledDotProductAttention::new()
            .attend(&q, &k, &v, None)
            .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { tensor: "key", .. }));

        let k = Tensor::zeros((1, 5, 8), DType::F32, &device)?;
        let mask = Tensor::zeros((1, 4, 4), DType::U8, &device)?;
        let err = ScaledDotProductAttention::new()
            .attend(&q, &k, &v, Some(&mask))
            .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { tensor: "mask", .. }));
        Ok(())
    }

    #[test]
    fn empty_key_axis_is_a_shape_error() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4), DType::F32, &device)?;
        let kv = Tensor::zeros((1, 0, 4), DType::F32, &device)?;
        let err = ScaledDotProductAttention::new()
            .attend(&q, &kv, &kv, None)
            .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { tensor: "key", .. }));
        Ok(())
    }

    #[test]
    fn repeated_calls_are_bit_identical() -> Result<()> {
        let (q, k, v) = build_inputs(&Device::Cpu)?;
        let attention = ScaledDotProductAttention::new();
        let a = attention.attend(&q, &k, &v, None)?.context.to_vec3::<f32>()?;
        let b = attention.attend(&q, &k, &v, None)?.context.to_vec3::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }
}
