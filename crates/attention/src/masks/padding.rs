//! Builders for padding masks used to drop padded keys.
//!
//! All padding masks share the dtype and layout described in
//! [`super::MASK_DTYPE`](super::MASK_DTYPE).

use candle_core::{Device, Error, Result, Tensor};

/// Construct padding masks from per-batch valid key lengths.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = vec![0u8; batch * q_len * k_len];

    for (b, &valid) in key_lengths.iter().enumerate() {
        let valid = valid.min(k_len);
        for q in 0..q_len {
            let row_start = (b * q_len + q) * k_len;
            data[row_start + valid..row_start + k_len].fill(1);
        }
    }

    Tensor::from_vec(data, (batch, q_len, k_len), device)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (masked) key position.
pub fn padding_mask_from_booleans(
    device: &Device,
    padding: &[Vec<bool>],
    q_len: usize,
) -> Result<Tensor> {
    let k_len = padding.first().map(Vec::len).unwrap_or(0);
    if let Some(row) = padding.iter().find(|row| row.len() != k_len) {
        return Err(Error::Msg(format!(
            "all boolean padding masks must share k_len {k_len}, found {}",
            row.len()
        )));
    }

    let batch = padding.len();
    let mut data = Vec::with_capacity(batch * q_len * k_len);
    for row in padding {
        for _ in 0..q_len {
            data.extend(row.iter().map(|&is_padding| u8::from(is_padding)));
        }
    }

    Tensor::from_vec(data, (batch, q_len, k_len), device)
}
