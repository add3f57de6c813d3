//! Impulse response file decoding.
//!
//! `.wav` goes through `hound`, `.mp3` through `symphonia`. The result is
//! planar `f32` at the file's own sample rate; trimming, normalisation and
//! resampling happen later in `dsp::impulse_response`.

use crate::error::IrLoadError;
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded audio, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

pub fn decode_file(path: &Path) -> Result<DecodedAudio, IrLoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let decoded = match ext.as_deref() {
        Some("wav") => decode_wav(path)?,
        Some("mp3") => decode_compressed(path, "mp3")?,
        _ => {
            return Err(IrLoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };
    if decoded.frames() == 0 {
        return Err(IrLoadError::Empty);
    }
    log::debug!(
        "Decoded {}: {} channel(s), {} frames @ {} Hz",
        path.display(),
        decoded.channels.len(),
        decoded.frames(),
        decoded.sample_rate
    );
    Ok(decoded)
}

fn decode_wav(path: &Path) -> Result<DecodedAudio, IrLoadError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let num_channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(DecodedAudio {
        channels: deinterleave(&interleaved, num_channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_compressed(path: &Path, extension: &str) -> Result<DecodedAudio, IrLoadError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(extension);

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| IrLoadError::NoAudioTrack {
            path: path.to_path_buf(),
        })?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut num_channels = track.codec_params.channels.map_or(0, |c| c.count());

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                num_channels = spec.channels.count();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            // Corrupt frames are skipped, as players do.
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping undecodable frame in {}: {}", path.display(), msg);
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(DecodedAudio {
        channels: deinterleave(&interleaved, num_channels.max(1)),
        sample_rate,
    })
}

fn deinterleave(interleaved: &[f32], num_channels: usize) -> Vec<Vec<f32>> {
    let frames = interleaved.len() / num_channels;
    let mut channels = vec![Vec::with_capacity(frames); num_channels];
    for frame in interleaved.chunks_exact(num_channels) {
        for (ch, &s) in channels.iter_mut().zip(frame) {
            ch.push(s);
        }
    }
    channels
}
