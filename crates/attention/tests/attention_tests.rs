use anyhow::Result;
use attention::{
    checkpoint, masks::padding_mask_from_booleans, relative_shift, unroll, AdditiveAttention,
    Attention, AttentionError, Config, CustomizingAttention, DotProductAttention,
    LocationAttention, LocationAwareAttention, MultiHeadAttention,
    MultiHeadLocationAwareAttention, RelativeMultiHeadAttention, ScaledDotProductAttention,
};
use candle_core::{DType, Device, Tensor};
use layers::{Initializer, Parameters};

fn init(seed: u64) -> Initializer {
    Initializer::seeded(seed, &Device::Cpu, DType::F32)
}

fn randn(shape: (usize, usize, usize)) -> Result<Tensor> {
    Ok(Tensor::randn(0f32, 1.0, shape, &Device::Cpu)?)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?.abs()?.flatten_all()?.max(0)?.to_vec0::<f32>()?)
}

fn assert_rows_sum_to_one(attn: &Tensor) -> Result<()> {
    let last = attn.rank() - 1;
    for sum in attn.sum(last)?.flatten_all()?.to_vec1::<f32>()? {
        assert!((sum - 1.0).abs() < 1e-5, "row sums to {sum}");
    }
    Ok(())
}

#[test]
fn every_variant_produces_normalised_alignments() -> Result<()> {
    let config = Config::new(8).with_heads(2).with_conv_out_channel(4);
    let query = randn((2, 1, 8))?;
    let value = randn((2, 5, 8))?;

    let scaled = ScaledDotProductAttention::new().attend(&query, &value, &value, None)?;
    assert_rows_sum_to_one(&scaled.attn)?;

    let plain = DotProductAttention::new(8)?.attend(&query, &value)?;
    assert_rows_sum_to_one(&plain.attn)?;

    let additive = AdditiveAttention::new(&config, &mut init(0))?.attend(&query, &value, &value, None)?;
    assert_rows_sum_to_one(&additive.attn)?;

    let location = LocationAwareAttention::new(&config, &mut init(1))?.attend_step(&query, &value, None)?;
    assert_rows_sum_to_one(&location.attn)?;

    let mhla =
        MultiHeadLocationAwareAttention::new(&config, &mut init(2))?.attend_step(&query, &value, None)?;
    assert_rows_sum_to_one(&mhla.attn)?;

    let custom = CustomizingAttention::new(&config, &mut init(3))?.attend_step(&query, &value, None)?;
    assert_rows_sum_to_one(&custom.attn)?;
    Ok(())
}

#[test]
fn transformer_shapes_for_small_batch() -> Result<()> {
    let config = Config::new(8).with_heads(2);
    let x = randn((2, 4, 8))?;

    let mha = MultiHeadAttention::new(&config, &mut init(7))?;
    let out = mha.attend(&x, &x, &x, None)?;
    assert_eq!(out.context.dims(), &[2, 4, 8]);
    assert_eq!(out.attn.dims(), &[4, 4, 4]);

    let relative = RelativeMultiHeadAttention::new(&config, &mut init(8))?;
    let pos = randn((2, 4, 8))?;
    let output = relative.forward(&x, &x, &x, &pos, None, false)?;
    assert_eq!(output.dims(), &[2, 4, 8]);
    Ok(())
}

#[test]
fn boolean_padding_mask_zeroes_padded_keys() -> Result<()> {
    let device = Device::Cpu;
    let config = Config::new(8).with_heads(2);
    let mha = MultiHeadAttention::new(&config, &mut init(11))?;
    let x = randn((2, 3, 8))?;
    let mask = padding_mask_from_booleans(
        &device,
        &[vec![false, false, true], vec![false, true, true]],
        3,
    )?;
    let out = mha.attend(&x, &x, &x, Some(&mask))?;
    let attn = out.attn.to_vec3::<f32>()?;
    // Rows are head-major: index = head * batch + b.
    for head in 0..2 {
        for row in &attn[head * 2] {
            assert!(row[2] < 1e-12);
        }
        for row in &attn[head * 2 + 1] {
            assert!(row[1] < 1e-12 && row[2] < 1e-12);
        }
    }
    Ok(())
}

#[test]
fn relative_shift_reproduces_reference_layout() -> Result<()> {
    let scores = Tensor::arange(1f32, 10.0, &Device::Cpu)?.reshape((1, 1, 3, 3))?;
    let shifted = relative_shift(&scores)?.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(shifted, vec![3., 0., 4., 5., 6., 0., 7., 8., 9.]);
    Ok(())
}

#[test]
fn non_divisible_heads_fail_for_every_multi_head_variant() {
    let config = Config::new(10).with_heads(4);
    assert!(matches!(
        MultiHeadAttention::new(&config, &mut init(0)),
        Err(AttentionError::Configuration(_))
    ));
    assert!(matches!(
        RelativeMultiHeadAttention::new(&config, &mut init(0)),
        Err(AttentionError::Configuration(_))
    ));
    assert!(matches!(
        MultiHeadLocationAwareAttention::new(&config, &mut init(0)),
        Err(AttentionError::Configuration(_))
    ));
    assert!(matches!(
        CustomizingAttention::new(&config, &mut init(0)),
        Err(AttentionError::Configuration(_))
    ));
}

#[test]
fn same_seed_gives_bit_identical_outputs() -> Result<()> {
    let config = Config::new(8).with_heads(2).with_dropout(Some(0.3));
    let x = randn((1, 4, 8))?;
    let pos = randn((1, 4, 8))?;
    let a = RelativeMultiHeadAttention::new(&config, &mut init(5))?;
    let b = RelativeMultiHeadAttention::new(&config, &mut init(5))?;
    let out_a = a.forward(&x, &x, &x, &pos, None, false)?;
    let out_b = b.forward(&x, &x, &x, &pos, None, false)?;
    assert_eq!(max_abs_diff(&out_a, &out_b)?, 0.0);
    Ok(())
}

#[test]
fn unroll_threads_alignment_through_decoder_steps() -> Result<()> {
    let config = Config::new(6).with_smoothing(true);
    let attention = LocationAwareAttention::new(&config, &mut init(21))?;
    let value = randn((2, 7, 6))?;
    let queries = (0..4)
        .map(|_| randn((2, 1, 6)))
        .collect::<Result<Vec<_>>>()?;

    let steps = unroll(&attention, &queries, &value)?;
    assert_eq!(steps.len(), 4);

    let mut last_attn: Option<Tensor> = None;
    for (query, step) in queries.iter().zip(&steps) {
        let manual = attention.attend_step(query, &value, last_attn.as_ref())?;
        assert_eq!(max_abs_diff(&manual.context, &step.context)?, 0.0);
        assert_rows_sum_to_one(&step.attn)?;
        last_attn = Some(manual.attn);
    }
    Ok(())
}

#[test]
fn checkpoint_round_trip_through_safetensors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relative.safetensors");
    let config = Config::new(8).with_heads(2);

    let source = RelativeMultiHeadAttention::new(&config, &mut init(100))?;
    let mut restored = RelativeMultiHeadAttention::new(&config, &mut init(200))?;
    checkpoint::save_parameters(&source, &path)?;
    checkpoint::load_parameters(&mut restored, &path)?;
    assert_eq!(source.num_parameters(), restored.num_parameters());

    let x = randn((1, 3, 8))?;
    let pos = randn((1, 3, 8))?;
    let expected = source.forward(&x, &x, &x, &pos, None, false)?;
    let actual = restored.forward(&x, &x, &x, &pos, None, false)?;
    assert_eq!(max_abs_diff(&expected, &actual)?, 0.0);
    Ok(())
}

#[test]
fn checkpoint_from_other_module_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mha.safetensors");
    let config = Config::new(8).with_heads(2);
    checkpoint::save_parameters(&MultiHeadAttention::new(&config, &mut init(1))?, &path)?;

    let mut additive = AdditiveAttention::new(&config, &mut init(2))?;
    assert!(matches!(
        checkpoint::load_parameters(&mut additive, &path),
        Err(AttentionError::Checkpoint(_))
    ));
    Ok(())
}

#[test]
fn config_file_drives_construction() -> Result<()> {
    use std::io::Write;

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    writeln!(file, "hidden_dim = 12\nnum_heads = 3\nconv_out_channel = 5")?;
    let config = Config::from_path(file.path())?;
    let attention = MultiHeadLocationAwareAttention::new(&config, &mut init(4))?;
    assert_eq!(attention.head_dim(), 4);

    let out = attention.attend_step(&randn((1, 1, 12))?, &randn((1, 6, 12))?, None)?;
    assert_eq!(out.attn.dims(), &[1, 3, 6]);
    Ok(())
}

#[test]
fn empty_source_sequences_are_rejected_by_every_variant() -> Result<()> {
    let config = Config::new(8).with_heads(2).with_conv_out_channel(3);
    let query = randn((2, 1, 8))?;
    let empty = Tensor::zeros((2, 0, 8), DType::F32, &Device::Cpu)?;
    let is_shape_error = |result: attention::Result<_>| {
        matches!(result, Err(AttentionError::ShapeMismatch { .. }))
    };

    assert!(is_shape_error(
        ScaledDotProductAttention::new().attend(&query, &empty, &empty, None)
    ));
    assert!(is_shape_error(DotProductAttention::new(8)?.attend(&query, &empty)));
    assert!(is_shape_error(
        AdditiveAttention::new(&config, &mut init(0))?.attend(&query, &empty, &empty, None)
    ));
    assert!(is_shape_error(
        MultiHeadAttention::new(&config, &mut init(1))?.attend(&query, &empty, &empty, None)
    ));
    assert!(is_shape_error(
        LocationAwareAttention::new(&config, &mut init(2))?.attend_step(&query, &empty, None)
    ));
    assert!(is_shape_error(
        MultiHeadLocationAwareAttention::new(&config, &mut init(3))?
            .attend_step(&query, &empty, None)
    ));
    assert!(is_shape_error(
        CustomizingAttention::new(&config, &mut init(4))?.attend_step(&query, &empty, None)
    ));

    let relative = RelativeMultiHeadAttention::new(&config, &mut init(5))?;
    assert!(matches!(
        relative.forward(&query, &empty, &empty, &empty, None, false),
        Err(AttentionError::ShapeMismatch { .. })
    ));
    Ok(())
}
