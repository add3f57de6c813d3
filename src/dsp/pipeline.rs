//! Per-block orchestration: dry copy, convolution, gated filter, mix.
//!
//! `prepare` is the only place that allocates. `process_block` reads the
//! parameter store once, installs any queued kernel, then works through each
//! channel in chunks of at most `max_block_size` samples so the dry copy
//! always fits the preallocated buffers.

use crate::dsp::ir_engine::{ImpulseResponseEngine, IrLoader};
use crate::dsp::impulse_response::ImpulseResponse;
use crate::dsp::mix::MixStage;
use crate::dsp::svf::{FilterStage, FilterState};
use crate::error::{IrLoadError, LayoutError};
use crate::meters::{peak_db, EngineStatus};
use crate::params::ParameterStore;
use std::sync::Arc;

/// Mono and stereo are the only supported layouts.
pub const MAX_CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSpec {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub num_channels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    /// Input and output must match and be mono or stereo.
    pub fn from_io(input: u32, output: u32) -> Result<Self, LayoutError> {
        if input != output {
            return Err(LayoutError::Mismatch { input, output });
        }
        match input {
            1 => Ok(ChannelLayout::Mono),
            2 => Ok(ChannelLayout::Stereo),
            channels => Err(LayoutError::UnsupportedChannelCount { channels }),
        }
    }

    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

pub struct ProcessingPipeline {
    spec: Option<ProcessSpec>,
    engine: ImpulseResponseEngine,
    filter: FilterStage,
    dry: Vec<Vec<f32>>,
    status: Arc<EngineStatus>,
}

impl ProcessingPipeline {
    pub fn new() -> (Self, IrLoader) {
        let (engine, loader) = ImpulseResponseEngine::new();
        let pipeline = Self {
            spec: None,
            engine,
            filter: FilterStage::new(),
            dry: Vec::new(),
            status: Arc::new(EngineStatus::new()),
        };
        (pipeline, loader)
    }

    /// Non-real-time. Must run before the first block and whenever the host
    /// changes sample rate, block size or channel count.
    pub fn prepare(&mut self, spec: ProcessSpec) -> Result<(), LayoutError> {
        let channels = spec.num_channels as u32;
        ChannelLayout::from_io(channels, channels)?;

        let max_block = spec.max_block_size.max(1);
        self.dry = vec![vec![0.0; max_block]; spec.num_channels];
        self.engine.prepare(spec);
        self.filter.prepare(spec);
        self.filter.reset();
        self.spec = Some(spec);

        self.status.reset();
        self.status.set_active_ir_len(self.engine.current_ir_size());
        self.status.set_kernel_generation(self.engine.generation());
        self.status.set_filter_state(self.filter.state());

        log::debug!(
            "Pipeline prepared: {} Hz, {} samples, {} channel(s)",
            spec.sample_rate,
            max_block,
            spec.num_channels
        );
        Ok(())
    }

    /// Clears convolution tails and filter state without touching the kernel.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.filter.reset();
        self.status.reset();
    }

    /// Non-real-time direct install, used where no render context is running.
    pub fn load_impulse_response(&mut self, ir: ImpulseResponse) -> Result<usize, IrLoadError> {
        let len = self.engine.load(ir)?;
        self.status.set_active_ir_len(len);
        self.status.set_kernel_generation(self.engine.generation());
        Ok(len)
    }

    /// Processes one host buffer in place. Never allocates, locks or fails:
    /// an unprepared pipeline, or channels beyond the prepared count, pass
    /// through unchanged.
    pub fn process_block(&mut self, block: &mut [&mut [f32]], params: &ParameterStore) {
        let Some(spec) = self.spec else {
            return;
        };
        let snapshot = params.snapshot();

        self.engine.begin_block();
        let ir_size = self.engine.current_ir_size();
        self.filter
            .configure(snapshot.cutoff, snapshot.resonance, spec.sample_rate);
        self.filter.set_type(snapshot.filter_type);
        self.filter.update_gate(ir_size);

        let chunk_len = spec.max_block_size.max(1);
        let mut input_peak = crate::meters::METER_FLOOR_DB;
        let mut output_peak = crate::meters::METER_FLOOR_DB;

        for (ch, samples) in block.iter_mut().enumerate() {
            let Some(dry) = self.dry.get_mut(ch) else {
                break;
            };
            for chunk in samples.chunks_mut(chunk_len) {
                let dry = &mut dry[..chunk.len()];
                dry.copy_from_slice(chunk);
                input_peak = input_peak.max(peak_db(dry));

                self.engine.process_channel(ch, chunk);
                self.filter.process_channel(ch, chunk);
                MixStage::blend(dry, chunk, snapshot.mix);

                output_peak = output_peak.max(peak_db(chunk));
            }
        }

        self.status.set_input_peak_db(input_peak);
        self.status.set_output_peak_db(output_peak);
        self.status.set_active_ir_len(ir_size);
        self.status.set_filter_state(self.filter.state());
        self.status.set_kernel_generation(self.engine.generation());
    }

    /// Samples of ringing left after the input stops.
    pub fn tail_len(&self) -> usize {
        match self.engine.current_ir_size() {
            n if n > 1 => n,
            _ => 0,
        }
    }

    #[inline]
    pub fn current_ir_size(&self) -> usize {
        self.engine.current_ir_size()
    }

    /// Incremented every time a new kernel is installed.
    #[inline]
    pub fn kernel_generation(&self) -> u64 {
        self.engine.generation()
    }

    /// Kernels sent back to the loader; a change means the loader has work.
    #[inline]
    pub fn returned_kernels(&self) -> u64 {
        self.engine.returned()
    }

    #[inline]
    pub fn filter_state(&self) -> FilterState {
        self.filter.state()
    }

    pub fn spec(&self) -> Option<ProcessSpec> {
        self.spec
    }

    /// Shared handle for the control context.
    pub fn status(&self) -> Arc<EngineStatus> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{FilterType, ParamId};

    fn stereo_spec(max_block_size: usize) -> ProcessSpec {
        ProcessSpec {
            sample_rate: 48_000.0,
            max_block_size,
            num_channels: 2,
        }
    }

    #[test]
    fn test_layouts() {
        assert_eq!(ChannelLayout::from_io(1, 1), Ok(ChannelLayout::Mono));
        assert_eq!(ChannelLayout::from_io(2, 2), Ok(ChannelLayout::Stereo));
        assert_eq!(
            ChannelLayout::from_io(1, 2),
            Err(LayoutError::Mismatch {
                input: 1,
                output: 2
            })
        );
        assert_eq!(
            ChannelLayout::from_io(6, 6),
            Err(LayoutError::UnsupportedChannelCount { channels: 6 })
        );
    }

    #[test]
    fn test_prepare_rejects_surround() {
        let (mut pipeline, _loader) = ProcessingPipeline::new();
        let spec = ProcessSpec {
            num_channels: 6,
            ..stereo_spec(64)
        };
        assert!(pipeline.prepare(spec).is_err());
        assert!(pipeline.spec().is_none());
    }

    #[test]
    fn test_unprepared_is_passthrough() {
        let (mut pipeline, _loader) = ProcessingPipeline::new();
        let params = ParameterStore::new();
        let mut left = vec![0.5; 32];
        pipeline.process_block(&mut [&mut left[..]], &params);
        assert!(left.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_oversized_block_is_chunked() {
        let (mut pipeline, _loader) = ProcessingPipeline::new();
        pipeline.prepare(stereo_spec(16)).unwrap();
        pipeline
            .load_impulse_response(ImpulseResponse::from_mono(&[0.0, 1.0], 48_000.0))
            .unwrap();
        let params = ParameterStore::new();
        params.set(ParamId::Mix, 1.0);

        let mut left: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut right = left.clone();
        pipeline.process_block(&mut [&mut left[..], &mut right[..]], &params);

        // One-sample delay, seamless across chunk boundaries.
        assert_eq!(left.len(), 100);
        for i in 1..100 {
            assert!((left[i] - (i - 1) as f32).abs() < 1e-3, "sample {}", i);
            assert!((right[i] - left[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_status_follows_processing() {
        let (mut pipeline, mut loader) = ProcessingPipeline::new();
        pipeline.prepare(stereo_spec(64)).unwrap();
        let status = pipeline.status();
        let params = ParameterStore::new();
        params.set_filter_type(FilterType::HighPass);

        loader
            .load(ImpulseResponse::from_mono(&[1.0, 0.5, 0.25], 48_000.0))
            .unwrap();
        let mut left = vec![0.5; 64];
        pipeline.process_block(&mut [&mut left[..]], &params);

        assert_eq!(status.get_active_ir_len(), 3);
        assert_eq!(status.get_kernel_generation(), 1);
        assert_eq!(status.get_filter_state(), FilterState::HighPass);
        assert!((status.get_input_peak_db() - (-6.02)).abs() < 0.01);
        assert_eq!(pipeline.tail_len(), 3);
    }
}
