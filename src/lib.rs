mod debug;
pub mod dsp;
pub mod error;
pub mod ir_file;
pub mod meters;
pub mod params;
pub mod state;

use crate::dsp::{ChannelLayout, IrLoader, IrOptions, ProcessSpec, ProcessingPipeline};
use crate::error::IrLoadError;
use crate::meters::EngineStatus;
use crate::params::{
    skew_factor_for_centre, FilterType, ParamId, ParameterStore, CUTOFF_CENTRE_HZ,
    CUTOFF_DEFAULT_HZ, CUTOFF_MAX_HZ, CUTOFF_MIN_HZ, MIX_DEFAULT, RESONANCE_DEFAULT,
    RESONANCE_MAX, RESONANCE_MIN,
};
use nih_plug::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------
#[derive(Params)]
pub struct ReverbParams {
    /// File the current impulse response came from; reloaded by `initialize`.
    #[persist = "ir-path"]
    pub ir_path: Mutex<Option<PathBuf>>,

    #[id = "mix"]
    pub mix: FloatParam,

    #[id = "cutoff"]
    pub cutoff: FloatParam,

    #[id = "resonance"]
    pub resonance: FloatParam,

    #[id = "filterType"]
    pub filter_type: EnumParam<FilterType>,
}

// Helper to format values as "50%" for the DAW display
fn format_percent(v: f32) -> String {
    format!("{:.0}%", v * 100.0)
}

impl ReverbParams {
    /// Every host-facing parameter forwards its value into `store`.
    pub fn new(store: Arc<ParameterStore>) -> Self {
        let forward = |id: ParamId| {
            let store = store.clone();
            Arc::new(move |value: f32| {
                store.set(id, value);
            })
        };
        let filter_store = store.clone();

        Self {
            ir_path: Mutex::new(None),

            mix: FloatParam::new(
                "Mix",
                MIX_DEFAULT,
                FloatRange::Linear { min: 0.0, max: 1.0 },
            )
            .with_value_to_string(Arc::new(format_percent))
            .with_callback(forward(ParamId::Mix)),

            cutoff: FloatParam::new(
                "Cutoff",
                CUTOFF_DEFAULT_HZ,
                FloatRange::Skewed {
                    min: CUTOFF_MIN_HZ,
                    max: CUTOFF_MAX_HZ,
                    factor: skew_factor_for_centre(CUTOFF_MIN_HZ, CUTOFF_MAX_HZ, CUTOFF_CENTRE_HZ),
                },
            )
            .with_unit(" Hz")
            .with_step_size(1.0)
            .with_callback(forward(ParamId::Cutoff)),

            resonance: FloatParam::new(
                "Resonance",
                RESONANCE_DEFAULT,
                FloatRange::Linear {
                    min: RESONANCE_MIN,
                    max: RESONANCE_MAX,
                },
            )
            .with_step_size(0.01)
            .with_callback(forward(ParamId::Resonance)),

            filter_type: EnumParam::new("Filter Type", FilterType::None).with_callback(Arc::new(
                move |filter_type: FilterType| {
                    filter_store.set_filter_type(filter_type);
                },
            )),
        }
    }

    /// Pushes the current host values into `store`. Callbacks only fire on
    /// change, so this covers values restored before the callbacks existed.
    pub fn sync_store(&self, store: &ParameterStore) {
        store.set(ParamId::Mix, self.mix.value());
        store.set(ParamId::Cutoff, self.cutoff.value());
        store.set(ParamId::Resonance, self.resonance.value());
        store.set_filter_type(self.filter_type.value());
    }

    fn stored_ir_path(&self) -> Option<PathBuf> {
        self.ir_path.lock().ok().and_then(|path| path.clone())
    }
}

// -----------------------------------------------------------------------------
// BACKGROUND TASKS
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub enum IrTask {
    /// Decode, prepare and queue a new kernel.
    LoadImpulseResponse(PathBuf),
    /// Free kernels the render context has replaced.
    CollectGarbage,
}

// -----------------------------------------------------------------------------
// PLUGIN
// -----------------------------------------------------------------------------
pub struct ConvolutionReverb {
    params: Arc<ReverbParams>,
    store: Arc<ParameterStore>,
    pipeline: ProcessingPipeline,
    loader: Arc<Mutex<IrLoader>>,
    status: Arc<EngineStatus>,
}

impl Default for ConvolutionReverb {
    fn default() -> Self {
        let (pipeline, loader) = ProcessingPipeline::new();
        let status = pipeline.status();

        let mut store = ParameterStore::new();
        let changes = status.clone();
        store.subscribe(move |_, _| changes.record_param_change());
        let store = Arc::new(store);

        Self {
            params: Arc::new(ReverbParams::new(store.clone())),
            store,
            pipeline,
            loader: Arc::new(Mutex::new(loader)),
            status,
        }
    }
}

impl ConvolutionReverb {
    pub fn status(&self) -> Arc<EngineStatus> {
        self.status.clone()
    }

    pub fn store(&self) -> Arc<ParameterStore> {
        self.store.clone()
    }

    pub fn ir_load_handle(&self) -> IrLoadHandle {
        IrLoadHandle {
            loader: self.loader.clone(),
            params: self.params.clone(),
        }
    }

    fn process_internal(
        &mut self,
        buffer: &mut Buffer,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let returned = self.pipeline.returned_kernels();
        self.pipeline.process_block(buffer.as_slice(), &self.store);
        if self.pipeline.returned_kernels() != returned {
            context.execute_background(IrTask::CollectGarbage);
        }

        match self.pipeline.tail_len() {
            0 => ProcessStatus::Normal,
            len => ProcessStatus::Tail(len as u32),
        }
    }
}

/// Control-context entry point for replacing the impulse response, for host
/// glue or an editor. Loads block on file I/O; never use from `process`.
#[derive(Clone)]
pub struct IrLoadHandle {
    loader: Arc<Mutex<IrLoader>>,
    params: Arc<ReverbParams>,
}

impl IrLoadHandle {
    /// Decodes `path`, queues the kernel for the next block and remembers
    /// the path for the saved state. Returns the kernel length.
    pub fn load(&self, path: &Path) -> Result<usize, IrLoadError> {
        let mut loader = self.loader.lock().map_err(|_| IrLoadError::LoaderPoisoned)?;
        let len = loader.load_file(path, IrOptions::default())?;
        if let Ok(mut stored) = self.params.ir_path.lock() {
            *stored = Some(path.to_path_buf());
        }
        Ok(len)
    }

    pub fn collect_garbage(&self) -> usize {
        self.loader.lock().map_or(0, |mut loader| loader.collect_garbage())
    }
}

/// Queues an impulse response load on the plugin's background thread.
pub fn request_ir_load(executor: &AsyncExecutor<ConvolutionReverb>, path: PathBuf) {
    executor.execute_background(IrTask::LoadImpulseResponse(path));
}

fn run_task(task: IrTask, handle: &IrLoadHandle) {
    match task {
        IrTask::LoadImpulseResponse(path) => match handle.load(&path) {
            Ok(len) => log::info!("Queued {} ({} samples)", path.display(), len),
            Err(err) => {
                log::error!("Failed to load impulse response {}: {}", path.display(), err);
            }
        },
        IrTask::CollectGarbage => {
            let freed = handle.collect_garbage();
            log::debug!("Freed {} retired kernel(s)", freed);
        }
    }

    #[cfg(feature = "debug")]
    crate::debug::logger::drain_to_file();
}

impl Plugin for ConvolutionReverb {
    const NAME: &'static str = "IR Verb";
    const VENDOR: &'static str = "irverb";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    // Parameters are read once per block.
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = IrTask;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        #[cfg(feature = "debug")]
        crate::debug::logger::init_logger();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let layout = match ChannelLayout::from_io(
                audio_io_layout.main_input_channels.map_or(0, NonZeroU32::get),
                audio_io_layout.main_output_channels.map_or(0, NonZeroU32::get),
            ) {
                Ok(layout) => layout,
                Err(err) => {
                    log::error!("{}", err);
                    return false;
                }
            };

            let spec = ProcessSpec {
                sample_rate: buffer_config.sample_rate,
                max_block_size: buffer_config.max_buffer_size as usize,
                num_channels: layout.channels(),
            };
            // Holding the loader keeps a load from building at the old rate
            // while the rate changes underneath it.
            let loader = self.loader.lock();
            let prepared = self.pipeline.prepare(spec);
            drop(loader);
            if let Err(err) = prepared {
                log::error!("{}", err);
                return false;
            }
            self.params.sync_store(&self.store);

            let has_kernel = self.pipeline.current_ir_size() > 0
                || self.loader.lock().map_or(false, |l| l.has_pending());
            if !has_kernel {
                if let Some(path) = self.params.stored_ir_path() {
                    context.execute(IrTask::LoadImpulseResponse(path));
                }
            }

            #[cfg(feature = "debug")]
            crate::debug::logger::drain_to_file();

            true
        }))
        .unwrap_or(false)
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        let handle = self.ir_load_handle();
        Box::new(move |task| run_task(task, &handle))
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_internal(buffer, context)
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.pipeline.reset();
        }))
        .unwrap_or(());
    }
}

impl ClapPlugin for ConvolutionReverb {
    const CLAP_ID: &'static str = "com.irverb.convolution-reverb";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("Impulse response convolution reverb with a resonant filter");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Reverb,
        ClapFeature::Filter,
        ClapFeature::Stereo,
        ClapFeature::Mono,
    ];
}

impl Vst3Plugin for ConvolutionReverb {
    const VST3_CLASS_ID: [u8; 16] = *b"IrVerbConvReverb";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Reverb,
        Vst3SubCategory::Filter,
    ];
}

nih_export_clap!(ConvolutionReverb);
nih_export_vst3!(ConvolutionReverb);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_defaults_match_store() {
        let plugin = ConvolutionReverb::default();
        let snap = plugin.store.snapshot();
        assert_eq!(plugin.params.mix.default_plain_value(), snap.mix);
        assert_eq!(plugin.params.cutoff.default_plain_value(), snap.cutoff);
        assert_eq!(plugin.params.resonance.default_plain_value(), snap.resonance);
        assert_eq!(plugin.params.filter_type.value(), snap.filter_type);
    }

    #[test]
    fn test_cutoff_range_is_centred_on_1khz() {
        let params = ReverbParams::new(Arc::new(ParameterStore::new()));
        let centre = params.cutoff.preview_plain(0.5);
        assert!((centre - CUTOFF_CENTRE_HZ).abs() < 1.0, "{}", centre);
    }

    fn write_ir(path: &Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(0.5 / (1.0 + i as f32)).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_failed_load_keeps_stored_path() {
        let plugin = ConvolutionReverb::default();
        run_task(
            IrTask::LoadImpulseResponse(PathBuf::from("does-not-exist.wav")),
            &plugin.ir_load_handle(),
        );
        assert!(plugin.params.stored_ir_path().is_none());
    }

    #[test]
    fn test_load_task_stores_path_and_queues_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.wav");
        write_ir(&path, 400);

        let plugin = ConvolutionReverb::default();
        run_task(
            IrTask::LoadImpulseResponse(path.clone()),
            &plugin.ir_load_handle(),
        );

        assert_eq!(plugin.params.stored_ir_path(), Some(path));
        assert!(plugin.loader.lock().unwrap().has_pending());
    }

    #[test]
    fn test_handle_load_reaches_render_side() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.wav");
        write_ir(&path, 300);

        let mut plugin = ConvolutionReverb::default();
        plugin
            .pipeline
            .prepare(ProcessSpec {
                sample_rate: 48_000.0,
                max_block_size: 64,
                num_channels: 1,
            })
            .unwrap();
        let handle = plugin.ir_load_handle();
        assert!(handle.load(&path).unwrap() > 1);

        let mut block = vec![0.0; 64];
        plugin
            .pipeline
            .process_block(&mut [&mut block[..]], &plugin.store);
        assert!(plugin.pipeline.current_ir_size() > 1);
        assert_eq!(plugin.pipeline.returned_kernels(), 0);
    }
}
