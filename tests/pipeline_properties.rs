use approx::assert_abs_diff_eq;
use irverb::dsp::{FilterStage, FilterState, ImpulseResponse, ProcessSpec, ProcessingPipeline};
use irverb::params::{FilterType, ParamId, ParameterStore};

const SR: f32 = 48_000.0;

fn spec(num_channels: usize, max_block_size: usize) -> ProcessSpec {
    ProcessSpec {
        sample_rate: SR,
        max_block_size,
        num_channels,
    }
}

fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
        })
        .collect()
}

fn decaying_ir(len: usize) -> Vec<f32> {
    noise(len, 99)
        .into_iter()
        .enumerate()
        .map(|(i, s)| s * (-(i as f32) / (len as f32 / 4.0)).exp())
        .collect()
}

fn direct_convolution(input: &[f32], ir: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; input.len()];
    for (n, y) in out.iter_mut().enumerate() {
        for (k, &h) in ir.iter().enumerate().take(n + 1) {
            *y += h * input[n - k];
        }
    }
    out
}

/// Runs `left`/`right` through the pipeline in blocks of `block`.
fn render_stereo(
    pipeline: &mut ProcessingPipeline,
    store: &ParameterStore,
    left: &mut [f32],
    right: &mut [f32],
    block: usize,
) {
    let mut start = 0;
    while start < left.len() {
        let end = (start + block).min(left.len());
        pipeline.process_block(&mut [&mut left[start..end], &mut right[start..end]], store);
        start = end;
    }
}

#[test]
fn block_shape_is_preserved() {
    let (mut pipeline, _loader) = ProcessingPipeline::new();
    pipeline.prepare(spec(1, 256)).unwrap();
    pipeline
        .load_impulse_response(ImpulseResponse::from_mono(&decaying_ir(300), SR))
        .unwrap();
    let store = ParameterStore::new();
    store.set_filter_type(FilterType::BandPass);

    for len in [1usize, 17, 256, 700] {
        let mut mono = noise(len, len as u32);
        pipeline.process_block(&mut [&mut mono[..]], &store);
        assert_eq!(mono.len(), len);
        assert!(mono.iter().all(|s| s.is_finite()));
    }
}

#[test]
fn zero_mix_returns_dry_signal() {
    let (mut pipeline, _loader) = ProcessingPipeline::new();
    pipeline.prepare(spec(2, 128)).unwrap();
    pipeline
        .load_impulse_response(ImpulseResponse::from_mono(&decaying_ir(1_000), SR))
        .unwrap();
    let store = ParameterStore::new();
    store.set(ParamId::Mix, 0.0);
    store.set_filter_type(FilterType::HighPass);
    store.set(ParamId::Resonance, 5.0);

    let dry_l = noise(1_000, 1);
    let dry_r = noise(1_000, 2);
    let (mut left, mut right) = (dry_l.clone(), dry_r.clone());
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 128);

    for i in 0..dry_l.len() {
        assert_abs_diff_eq!(left[i], dry_l[i], epsilon = 1e-7);
        assert_abs_diff_eq!(right[i], dry_r[i], epsilon = 1e-7);
    }
}

#[test]
fn full_mix_is_filtered_convolution() {
    // Both the general property and the low-pass scenario: mix 1, LP 500 Hz,
    // Q 1, multi-tap IR -> no dry leakage at all.
    let ir = decaying_ir(900);
    let (mut pipeline, _loader) = ProcessingPipeline::new();
    pipeline.prepare(spec(2, 512)).unwrap();
    pipeline
        .load_impulse_response(ImpulseResponse::from_mono(&ir, SR))
        .unwrap();

    let store = ParameterStore::new();
    store.set(ParamId::Mix, 1.0);
    store.set_filter_type(FilterType::LowPass);
    store.set(ParamId::Cutoff, 500.0);
    store.set(ParamId::Resonance, 1.0);

    let input = noise(2_000, 5);
    let (mut left, mut right) = (input.clone(), input.clone());
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 512);

    let mut expected = direct_convolution(&input, &ir);
    let mut filter = FilterStage::new();
    filter.prepare(spec(1, 512));
    filter.configure(500.0, 1.0, SR);
    filter.set_type(FilterType::LowPass);
    filter.update_gate(ir.len());
    filter.process_channel(0, &mut expected);

    for i in 0..input.len() {
        assert_abs_diff_eq!(left[i], expected[i], epsilon = 1e-3);
        assert_abs_diff_eq!(right[i], expected[i], epsilon = 1e-3);
    }
}

#[test]
fn without_ir_convolution_is_identity() {
    let (mut pipeline, _loader) = ProcessingPipeline::new();
    pipeline.prepare(spec(2, 64)).unwrap();
    let store = ParameterStore::new();
    store.set(ParamId::Mix, 0.3);

    let dry = noise(640, 8);
    let (mut left, mut right) = (dry.clone(), dry.clone());
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 64);
    for i in 0..dry.len() {
        assert_abs_diff_eq!(left[i], dry[i], epsilon = 1e-6);
        assert_abs_diff_eq!(right[i], dry[i], epsilon = 1e-6);
    }
    assert_eq!(pipeline.current_ir_size(), 0);
    assert_eq!(pipeline.tail_len(), 0);
}

#[test]
fn filter_is_gated_off_without_ir() {
    let (mut pipeline, _loader) = ProcessingPipeline::new();
    pipeline.prepare(spec(2, 256)).unwrap();
    let store = ParameterStore::new();
    store.set(ParamId::Mix, 1.0);
    store.set_filter_type(FilterType::LowPass);
    store.set(ParamId::Cutoff, 40.0);
    store.set(ParamId::Resonance, 5.0);

    let dry = noise(1_024, 13);
    let (mut left, mut right) = (dry.clone(), dry.clone());
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 256);

    assert_eq!(left, dry);
    assert_eq!(right, dry);
    assert_eq!(pipeline.filter_state(), FilterState::Bypassed);

    // A one-sample IR still counts as "no IR" for the gate.
    pipeline
        .load_impulse_response(ImpulseResponse::from_mono(&[1.0], SR))
        .unwrap();
    let (mut left, mut right) = (dry.clone(), dry.clone());
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 256);
    assert_eq!(left, dry);
}

#[test]
fn new_ir_does_not_inherit_old_tail() {
    let (mut pipeline, mut loader) = ProcessingPipeline::new();
    pipeline.prepare(spec(2, 256)).unwrap();
    let store = ParameterStore::new();
    store.set(ParamId::Mix, 1.0);

    loader
        .load(ImpulseResponse::from_mono(&decaying_ir(4_000), SR))
        .unwrap();
    let (mut left, mut right) = (noise(2_048, 3), noise(2_048, 4));
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 256);
    assert!(left[1_000..].iter().any(|s| s.abs() > 1e-3));

    // Identity kernel longer than one sample, so convolution stays engaged.
    loader
        .load(ImpulseResponse::from_mono(&[1.0, 0.0], SR))
        .unwrap();
    let mut left = vec![0.0; 1_024];
    let mut right = vec![0.0; 1_024];
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 256);

    assert_eq!(pipeline.current_ir_size(), 2);
    assert!(left.iter().chain(&right).all(|s| s.abs() < 1e-6));
    assert_eq!(loader.collect_garbage(), 1);
}

#[test]
fn preparing_twice_is_idempotent() {
    let ir = decaying_ir(700);
    let input = noise(3_000, 21);
    let store = ParameterStore::new();
    store.set_filter_type(FilterType::BandPass);
    store.set(ParamId::Cutoff, 2_000.0);

    let run = |prepare_count: usize| {
        let (mut pipeline, _loader) = ProcessingPipeline::new();
        pipeline.prepare(spec(2, 300)).unwrap();
        pipeline
            .load_impulse_response(ImpulseResponse::from_mono(&ir, SR))
            .unwrap();
        for _ in 1..prepare_count {
            pipeline.prepare(spec(2, 300)).unwrap();
        }
        let (mut left, mut right) = (input.clone(), input.clone());
        render_stereo(&mut pipeline, &store, &mut left, &mut right, 300);
        left
    };

    assert_eq!(run(1), run(2));
}

#[test]
fn unit_impulse_at_half_mix_is_transparent() {
    let (mut pipeline, _loader) = ProcessingPipeline::new();
    pipeline.prepare(spec(2, 512)).unwrap();
    pipeline
        .load_impulse_response(ImpulseResponse::from_mono(&[1.0], SR))
        .unwrap();
    let store = ParameterStore::new();
    store.set(ParamId::Mix, 0.5);
    store.set_filter_type(FilterType::None);

    let dry = noise(2_048, 34);
    let (mut left, mut right) = (dry.clone(), dry.clone());
    render_stereo(&mut pipeline, &store, &mut left, &mut right, 512);
    for i in 0..dry.len() {
        assert_abs_diff_eq!(left[i], dry[i], epsilon = 1e-6);
        assert_abs_diff_eq!(right[i], dry[i], epsilon = 1e-6);
    }
}
