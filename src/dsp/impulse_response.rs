//! Impulse response buffer and its load-time preparation.
//!
//! All of this runs on the control context: it allocates freely. The render
//! context only ever sees the finished kernel built from an `ImpulseResponse`.

use crate::dsp::utils::db_to_gain;
use crate::error::IrLoadError;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Kernels are always stereo; mono files are duplicated.
pub const IR_CHANNELS: usize = 2;
/// Samples quieter than this at the head or tail are trimmed.
pub const TRIM_THRESHOLD_DB: f32 = -80.0;
/// Energy of the loudest channel after normalisation (as an RMS sum).
pub const NORMALISE_TARGET: f32 = 0.125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrOptions {
    pub trim: bool,
    pub normalise: bool,
}

impl Default for IrOptions {
    fn default() -> Self {
        Self {
            trim: true,
            normalise: true,
        }
    }
}

/// Stereo impulse response at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    channels: Vec<Vec<f32>>,
    sample_rate: f32,
}

impl ImpulseResponse {
    /// Takes decoded channel data as-is (no trimming or normalisation) and
    /// brings it to exactly two channels of equal length.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: f32) -> Self {
        channels.truncate(IR_CHANNELS);
        match channels.len() {
            0 => channels = vec![Vec::new(); IR_CHANNELS],
            1 => {
                let mono = channels[0].clone();
                channels.push(mono);
            }
            _ => {}
        }
        let len = channels.iter().map(Vec::len).max().unwrap_or(0);
        for ch in &mut channels {
            ch.resize(len, 0.0);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn from_mono(samples: &[f32], sample_rate: f32) -> Self {
        Self::new(vec![samples.to_vec()], sample_rate)
    }

    pub fn empty(sample_rate: f32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// Decoded file data -> stereo, trimmed, normalised impulse response.
    pub fn prepare(channels: Vec<Vec<f32>>, sample_rate: f32, options: IrOptions) -> Self {
        let mut ir = Self::new(channels, sample_rate);
        if options.trim {
            ir.trim_silence(db_to_gain(TRIM_THRESHOLD_DB));
        }
        if options.normalise {
            ir.normalise(NORMALISE_TARGET);
        }
        ir
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn channel(&self, ch: usize) -> &[f32] {
        &self.channels[ch.min(IR_CHANNELS - 1)]
    }

    fn trim_silence(&mut self, threshold: f32) {
        let audible = |i: usize| self.channels.iter().any(|ch| ch[i].abs() > threshold);
        let len = self.len();
        let Some(start) = (0..len).find(|&i| audible(i)) else {
            for ch in &mut self.channels {
                ch.clear();
            }
            return;
        };
        let end = (start..len).rev().find(|&i| audible(i)).map_or(len, |i| i + 1);
        for ch in &mut self.channels {
            ch.truncate(end);
            ch.drain(..start);
        }
    }

    fn normalise(&mut self, target: f32) {
        let max_energy = self
            .channels
            .iter()
            .map(|ch| ch.iter().map(|s| s * s).sum::<f32>())
            .fold(0.0f32, f32::max);
        if max_energy <= 0.0 {
            return;
        }
        let gain = target / max_energy.sqrt();
        for ch in &mut self.channels {
            for s in ch.iter_mut() {
                *s *= gain;
            }
        }
    }

    /// Band-limited sample rate conversion of the whole response.
    pub fn resampled(&self, target_rate: f32) -> Result<Self, IrLoadError> {
        if self.is_empty() || (target_rate - self.sample_rate).abs() < 0.5 {
            return Ok(Self {
                channels: self.channels.clone(),
                sample_rate: target_rate,
            });
        }
        if !(target_rate > 0.0 && self.sample_rate > 0.0) {
            return Err(IrLoadError::Resample {
                reason: format!("invalid rates {} -> {}", self.sample_rate, target_rate),
            });
        }

        let ratio = target_rate as f64 / self.sample_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let resample_err = |e: &dyn std::fmt::Display| IrLoadError::Resample {
            reason: e.to_string(),
        };

        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, self.len(), IR_CHANNELS)
            .map_err(|e| resample_err(&e))?;
        let delay = resampler.output_delay();
        let expected = (self.len() as f64 * ratio).ceil() as usize;

        let mut out = resampler
            .process(&self.channels, None)
            .map_err(|e| resample_err(&e))?;
        // Feed silence until the sinc filter delay has been flushed out.
        while out[0].len() < delay + expected {
            let flushed = resampler
                .process_partial::<Vec<f32>>(None, None)
                .map_err(|e| resample_err(&e))?;
            if flushed[0].is_empty() {
                break;
            }
            for (ch, extra) in out.iter_mut().zip(flushed) {
                ch.extend_from_slice(&extra);
            }
        }

        let channels = out
            .into_iter()
            .map(|ch| {
                let end = (delay + expected).min(ch.len());
                ch[delay.min(end)..end].to_vec()
            })
            .collect();
        Ok(Self {
            channels,
            sample_rate: target_rate,
        })
    }
}
