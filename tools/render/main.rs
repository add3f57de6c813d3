//! Offline renderer: runs a WAV file through the reverb in host-sized blocks.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use hound::{SampleFormat, WavSpec, WavWriter};
use irverb::dsp::{ChannelLayout, ImpulseResponse, IrOptions, ProcessSpec, ProcessingPipeline};
use irverb::ir_file::decode_file;
use irverb::params::{FilterType, ParamId, ParameterStore};
use irverb::state::PluginState;
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    None,
    Lowpass,
    Bandpass,
    Highpass,
}

impl From<FilterArg> for FilterType {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::None => FilterType::None,
            FilterArg::Lowpass => FilterType::LowPass,
            FilterArg::Bandpass => FilterType::BandPass,
            FilterArg::Highpass => FilterType::HighPass,
        }
    }
}

#[derive(Parser)]
#[command(name = "irverb_render")]
#[command(about = "Render audio through the IR convolution reverb", long_about = None)]
struct Cli {
    /// Input WAV file (mono or stereo)
    input: PathBuf,

    /// Output WAV file (32-bit float)
    output: PathBuf,

    /// Impulse response (.wav or .mp3); overrides the one in --state
    #[arg(long)]
    ir: Option<PathBuf>,

    /// JSON state file; flags given on the command line take precedence
    #[arg(long)]
    state: Option<PathBuf>,

    /// Dry/wet mix 0.0-1.0
    #[arg(long)]
    mix: Option<f32>,

    /// Filter cutoff in Hz
    #[arg(long)]
    cutoff: Option<f32>,

    /// Filter resonance (Q) 1.0-5.0
    #[arg(long)]
    resonance: Option<f32>,

    #[arg(long, value_enum)]
    filter: Option<FilterArg>,

    /// Block size used for processing (default: 512)
    #[arg(short, long, default_value = "512")]
    block_size: usize,

    /// Stop at the end of the input instead of rendering the reverb tail
    #[arg(long)]
    no_tail: bool,

    /// Skip silence trimming and normalisation of the impulse response
    #[arg(long)]
    raw_ir: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let store = ParameterStore::new();
    let mut ir_path = None;
    if let Some(state_path) = &cli.state {
        let json = std::fs::read_to_string(state_path)
            .with_context(|| format!("failed to read state file '{}'", state_path.display()))?;
        let state = PluginState::from_json(&json)
            .with_context(|| format!("invalid state file '{}'", state_path.display()))?;
        state.apply(&store);
        ir_path = state.ir_path;
    }
    if let Some(mix) = cli.mix {
        store.set(ParamId::Mix, mix);
    }
    if let Some(cutoff) = cli.cutoff {
        store.set(ParamId::Cutoff, cutoff);
    }
    if let Some(resonance) = cli.resonance {
        store.set(ParamId::Resonance, resonance);
    }
    if let Some(filter) = cli.filter {
        store.set_filter_type(filter.into());
    }
    if cli.ir.is_some() {
        ir_path = cli.ir.clone();
    }

    let decoded = decode_file(&cli.input)
        .with_context(|| format!("failed to decode input '{}'", cli.input.display()))?;
    let layout = ChannelLayout::from_io(decoded.channels.len() as u32, decoded.channels.len() as u32)
        .with_context(|| format!("unsupported input '{}'", cli.input.display()))?;
    if cli.block_size == 0 {
        bail!("block size must be at least 1");
    }

    let (mut pipeline, _loader) = ProcessingPipeline::new();
    pipeline.prepare(ProcessSpec {
        sample_rate: decoded.sample_rate as f32,
        max_block_size: cli.block_size,
        num_channels: layout.channels(),
    })?;

    if let Some(path) = &ir_path {
        let ir_audio = decode_file(path)
            .with_context(|| format!("failed to decode impulse response '{}'", path.display()))?;
        let options = if cli.raw_ir {
            IrOptions {
                trim: false,
                normalise: false,
            }
        } else {
            IrOptions::default()
        };
        let ir = ImpulseResponse::prepare(ir_audio.channels, ir_audio.sample_rate as f32, options);
        let len = pipeline.load_impulse_response(ir)?;
        log::info!("Impulse response {}: {} samples at render rate", path.display(), len);
    }

    let mut channels = decoded.channels;
    if !cli.no_tail {
        let tail = pipeline.tail_len();
        for ch in &mut channels {
            ch.resize(ch.len() + tail, 0.0);
        }
    }

    let frames = channels[0].len();
    let mut start = 0;
    while start < frames {
        let end = (start + cli.block_size).min(frames);
        let mut block: Vec<&mut [f32]> = channels
            .iter_mut()
            .map(|ch| &mut ch[start..end])
            .collect();
        pipeline.process_block(&mut block, &store);
        start = end;
    }

    let status = pipeline.status();
    log::info!(
        "Rendered {} frames; filter {:?}, output peak {:.1} dBFS (last block)",
        frames,
        status.get_filter_state(),
        status.get_output_peak_db()
    );

    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate: decoded.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&cli.output, spec)
        .with_context(|| format!("failed to create '{}'", cli.output.display()))?;
    for i in 0..frames {
        for ch in &channels {
            writer.write_sample(ch[i])?;
        }
    }
    writer.finalize()?;
    println!("Wrote {}", cli.output.display());
    Ok(())
}
