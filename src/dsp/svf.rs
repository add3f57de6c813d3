//! Switchable resonant state-variable filter (TPT form).
//!
//! One pair of integrators per channel yields low-pass, band-pass and
//! high-pass outputs at once, so changing the type never rebuilds anything.
//! Resonance is used directly as Q (1..5).
//!
//! # Design Notes
//! - Coefficients are recomputed only when cutoff, resonance or sample rate
//!   differ from the previous block.
//! - The stage only runs when a type is selected AND an impulse response
//!   longer than one sample is active; otherwise it is `Bypassed`.
//! - Integrators are cleared on `prepare` and whenever the stage leaves
//!   `Bypassed`, so re-engaging never replays stale state.

use crate::dsp::ProcessSpec;
use crate::params::FilterType;
use std::f32::consts::PI;

/// Highest usable cutoff as a fraction of the sample rate.
const MAX_CUTOFF_RATIO: f32 = 0.49;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterState {
    Bypassed = 0,
    LowPass = 1,
    BandPass = 2,
    HighPass = 3,
}

impl FilterState {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => FilterState::LowPass,
            2 => FilterState::BandPass,
            3 => FilterState::HighPass,
            _ => FilterState::Bypassed,
        }
    }

    /// State the stage should be in for `filter_type` with an IR of `ir_size` samples.
    pub fn gated(filter_type: FilterType, ir_size: usize) -> Self {
        if ir_size <= 1 {
            return FilterState::Bypassed;
        }
        match filter_type {
            FilterType::None => FilterState::Bypassed,
            FilterType::LowPass => FilterState::LowPass,
            FilterType::BandPass => FilterState::BandPass,
            FilterType::HighPass => FilterState::HighPass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvfCoefficients {
    g: f32,
    r2: f32,
    h: f32,
}

impl SvfCoefficients {
    pub fn new(cutoff: f32, resonance: f32, sample_rate: f32) -> Self {
        let sr = sample_rate.max(1.0);
        let fc = cutoff.clamp(1.0, sr * MAX_CUTOFF_RATIO);
        let g = (PI * fc / sr).tan();
        let r2 = 1.0 / resonance.max(1e-3);
        let h = 1.0 / (1.0 + r2 * g + g * g);
        Self { g, r2, h }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Integrators {
    s1: f32,
    s2: f32,
}

impl Integrators {
    #[inline]
    fn tick(&mut self, x: f32, c: &SvfCoefficients, state: FilterState) -> f32 {
        let hp = c.h * (x - self.s1 * (c.g + c.r2) - self.s2);
        let bp = hp * c.g + self.s1;
        self.s1 = hp * c.g + bp;
        let lp = bp * c.g + self.s2;
        self.s2 = bp * c.g + lp;

        match state {
            FilterState::LowPass => lp,
            FilterState::BandPass => bp,
            FilterState::HighPass => hp,
            FilterState::Bypassed => x,
        }
    }
}

pub struct FilterStage {
    coeffs: SvfCoefficients,
    cutoff: f32,
    resonance: f32,
    sample_rate: f32,
    filter_type: FilterType,
    state: FilterState,
    channels: Vec<Integrators>,
}

impl Default for FilterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterStage {
    pub fn new() -> Self {
        let cutoff = crate::params::CUTOFF_DEFAULT_HZ;
        let resonance = crate::params::RESONANCE_DEFAULT;
        let sample_rate = 48_000.0;
        Self {
            coeffs: SvfCoefficients::new(cutoff, resonance, sample_rate),
            cutoff,
            resonance,
            sample_rate,
            filter_type: FilterType::None,
            state: FilterState::Bypassed,
            channels: vec![Integrators::default(); crate::dsp::MAX_CHANNELS],
        }
    }

    /// Non-real-time. Sizes per-channel state and clears it.
    pub fn prepare(&mut self, spec: ProcessSpec) {
        self.channels = vec![Integrators::default(); spec.num_channels.max(1)];
        self.sample_rate = spec.sample_rate;
        self.coeffs = SvfCoefficients::new(self.cutoff, self.resonance, self.sample_rate);
    }

    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            *ch = Integrators::default();
        }
    }

    /// Returns true if the coefficients were recomputed.
    pub fn configure(&mut self, cutoff: f32, resonance: f32, sample_rate: f32) -> bool {
        if cutoff == self.cutoff && resonance == self.resonance && sample_rate == self.sample_rate
        {
            return false;
        }
        self.cutoff = cutoff;
        self.resonance = resonance;
        self.sample_rate = sample_rate;
        self.coeffs = SvfCoefficients::new(cutoff, resonance, sample_rate);
        true
    }

    pub fn set_type(&mut self, filter_type: FilterType) {
        self.filter_type = filter_type;
    }

    /// Applies the gating rule for this block and returns the resulting state.
    pub fn update_gate(&mut self, ir_size: usize) -> FilterState {
        let next = FilterState::gated(self.filter_type, ir_size);
        if self.state == FilterState::Bypassed && next != FilterState::Bypassed {
            self.reset();
        }
        self.state = next;
        next
    }

    #[inline]
    pub fn state(&self) -> FilterState {
        self.state
    }

    /// Filters one channel in place. No-op while bypassed.
    #[inline]
    pub fn process_channel(&mut self, ch: usize, samples: &mut [f32]) {
        if self.state == FilterState::Bypassed {
            return;
        }
        let Some(integrators) = self.channels.get_mut(ch) else {
            return;
        };
        let coeffs = self.coeffs;
        let state = self.state;
        for s in samples.iter_mut() {
            *s = integrators.tick(*s, &coeffs, state);
        }
    }

    pub fn process(&mut self, block: &mut [&mut [f32]]) {
        for (ch, samples) in block.iter_mut().enumerate() {
            self.process_channel(ch, samples);
        }
    }
}
