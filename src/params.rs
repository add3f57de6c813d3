//! Parameter store shared between the control and render contexts.
//!
//! Every parameter lives in its own `AtomicU32` (f32 bits), so writes from
//! the control context and reads from the render context never tear and
//! never block. There is no ordering between different parameters: a block
//! may see a new `cutoff` together with an old `resonance`.
//!
//! Values are not smoothed. The render context reads each value once per
//! block, so a change shows up as a step at the next block boundary.

use nih_plug::prelude::Enum;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

pub const MIX_DEFAULT: f32 = 0.5;

pub const CUTOFF_MIN_HZ: f32 = 20.0;
pub const CUTOFF_MAX_HZ: f32 = 20_000.0;
pub const CUTOFF_CENTRE_HZ: f32 = 1_000.0;
pub const CUTOFF_DEFAULT_HZ: f32 = 1_000.0;

pub const RESONANCE_MIN: f32 = 1.0;
pub const RESONANCE_MAX: f32 = 5.0;
pub const RESONANCE_DEFAULT: f32 = 1.0;

// =============================================================================
// FILTER TYPE
// =============================================================================

/// Post-convolution filter topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum FilterType {
    #[serde(rename = "No Filter")]
    #[name = "No Filter"]
    #[id = "none"]
    None,
    #[serde(rename = "Low Pass")]
    #[name = "Low Pass"]
    #[id = "low-pass"]
    LowPass,
    #[serde(rename = "Band Pass")]
    #[name = "Band Pass"]
    #[id = "band-pass"]
    BandPass,
    #[serde(rename = "High Pass")]
    #[name = "High Pass"]
    #[id = "high-pass"]
    HighPass,
}

impl FilterType {
    pub fn all() -> [FilterType; 4] {
        [
            FilterType::None,
            FilterType::LowPass,
            FilterType::BandPass,
            FilterType::HighPass,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterType::None => "No Filter",
            FilterType::LowPass => "Low Pass",
            FilterType::BandPass => "Band Pass",
            FilterType::HighPass => "High Pass",
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Out-of-range indices map to the nearest valid choice.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => FilterType::None,
            1 => FilterType::LowPass,
            2 => FilterType::BandPass,
            _ => FilterType::HighPass,
        }
    }
}

impl Default for FilterType {
    fn default() -> Self {
        FilterType::None
    }
}

// =============================================================================
// RANGES
// =============================================================================

/// Skew exponent that puts `centre` at the middle of the normalised range.
pub fn skew_factor_for_centre(min: f32, max: f32, centre: f32) -> f32 {
    0.5f32.ln() / ((centre - min) / (max - min)).ln()
}

/// Declared range of a parameter. `normalized = ((v - min) / (max - min))^skew`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
    pub skew: f32,
    pub default: f32,
    pub stepped: bool,
}

impl ParamRange {
    pub const fn linear(min: f32, max: f32, default: f32) -> Self {
        Self {
            min,
            max,
            skew: 1.0,
            default,
            stepped: false,
        }
    }

    pub fn skewed_for_centre(min: f32, max: f32, centre: f32, default: f32) -> Self {
        Self {
            min,
            max,
            skew: skew_factor_for_centre(min, max, centre),
            default,
            stepped: false,
        }
    }

    pub const fn choice(count: usize, default: usize) -> Self {
        Self {
            min: 0.0,
            max: (count - 1) as f32,
            skew: 1.0,
            default: default as f32,
            stepped: true,
        }
    }

    /// Brings any input into range. NaN falls back to the default.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        let v = value.clamp(self.min, self.max);
        if self.stepped {
            v.round()
        } else {
            v
        }
    }

    pub fn normalize(&self, plain: f32) -> f32 {
        let proportion = (self.clamp(plain) - self.min) / (self.max - self.min);
        proportion.powf(self.skew)
    }

    pub fn unnormalize(&self, normalized: f32) -> f32 {
        let n = if normalized.is_nan() {
            self.normalize(self.default)
        } else {
            normalized.clamp(0.0, 1.0)
        };
        self.clamp(self.min + n.powf(1.0 / self.skew) * (self.max - self.min))
    }
}

// =============================================================================
// PARAMETER IDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Mix,
    Cutoff,
    Resonance,
    FilterType,
}

impl ParamId {
    pub const ALL: [ParamId; 4] = [
        ParamId::Mix,
        ParamId::Cutoff,
        ParamId::Resonance,
        ParamId::FilterType,
    ];

    /// Host-facing identifier.
    pub fn id(self) -> &'static str {
        match self {
            ParamId::Mix => "mix",
            ParamId::Cutoff => "cutoff",
            ParamId::Resonance => "resonance",
            ParamId::FilterType => "filterType",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn range(self) -> ParamRange {
        match self {
            ParamId::Mix => ParamRange::linear(0.0, 1.0, MIX_DEFAULT),
            ParamId::Cutoff => ParamRange::skewed_for_centre(
                CUTOFF_MIN_HZ,
                CUTOFF_MAX_HZ,
                CUTOFF_CENTRE_HZ,
                CUTOFF_DEFAULT_HZ,
            ),
            ParamId::Resonance => {
                ParamRange::linear(RESONANCE_MIN, RESONANCE_MAX, RESONANCE_DEFAULT)
            }
            ParamId::FilterType => ParamRange::choice(4, FilterType::None.index()),
        }
    }

    #[inline]
    fn slot(self) -> usize {
        self as usize
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Called with the parameter and its new (clamped) value whenever a value
/// actually changes.
pub type ParamSubscriber = Box<dyn Fn(ParamId, f32) + Send + Sync>;

/// One consistent-enough read of all parameters, taken once per block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSnapshot {
    pub mix: f32,
    pub cutoff: f32,
    pub resonance: f32,
    pub filter_type: FilterType,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            mix: MIX_DEFAULT,
            cutoff: CUTOFF_DEFAULT_HZ,
            resonance: RESONANCE_DEFAULT,
            filter_type: FilterType::None,
        }
    }
}

pub struct ParameterStore {
    values: [AtomicU32; 4],
    subscribers: Vec<ParamSubscriber>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        let default = |id: ParamId| AtomicU32::new(id.range().default.to_bits());
        Self {
            values: [
                default(ParamId::Mix),
                default(ParamId::Cutoff),
                default(ParamId::Resonance),
                default(ParamId::FilterType),
            ],
            subscribers: Vec::new(),
        }
    }

    /// Registers a change callback. Subscribers are fixed once the store is
    /// shared, so `set` never has to lock the list.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: Fn(ParamId, f32) + Send + Sync + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    /// Stores `value` clamped to the declared range and returns what was stored.
    pub fn set(&self, id: ParamId, value: f32) -> f32 {
        let stored = id.range().clamp(value);
        let previous = self.values[id.slot()].swap(stored.to_bits(), Ordering::Relaxed);
        if previous != stored.to_bits() {
            for subscriber in &self.subscribers {
                subscriber(id, stored);
            }
        }
        stored
    }

    /// Host automation arrives as a normalised 0..1 value.
    pub fn set_normalized(&self, id: ParamId, normalized: f32) -> f32 {
        self.set(id, id.range().unnormalize(normalized))
    }

    #[inline]
    pub fn get(&self, id: ParamId) -> f32 {
        f32::from_bits(self.values[id.slot()].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn mix(&self) -> f32 {
        self.get(ParamId::Mix)
    }

    #[inline]
    pub fn cutoff(&self) -> f32 {
        self.get(ParamId::Cutoff)
    }

    #[inline]
    pub fn resonance(&self) -> f32 {
        self.get(ParamId::Resonance)
    }

    #[inline]
    pub fn filter_type(&self) -> FilterType {
        FilterType::from_index(self.get(ParamId::FilterType) as usize)
    }

    pub fn set_filter_type(&self, filter_type: FilterType) -> FilterType {
        FilterType::from_index(self.set(ParamId::FilterType, filter_type.index() as f32) as usize)
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            mix: self.mix(),
            cutoff: self.cutoff(),
            resonance: self.resonance(),
            filter_type: self.filter_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let store = ParameterStore::new();
        let snap = store.snapshot();
        assert_eq!(snap, ParameterSnapshot::default());
        assert_eq!(store.filter_type(), FilterType::None);
    }

    #[test]
    fn test_values_are_clamped() {
        let store = ParameterStore::new();
        assert_eq!(store.set(ParamId::Mix, 1.7), 1.0);
        assert_eq!(store.set(ParamId::Cutoff, 5.0), CUTOFF_MIN_HZ);
        assert_eq!(store.set(ParamId::Resonance, 9.0), RESONANCE_MAX);
        assert_eq!(store.set(ParamId::Mix, f32::NAN), MIX_DEFAULT);
        assert_eq!(store.set(ParamId::FilterType, 2.4), 2.0);
        assert_eq!(store.filter_type(), FilterType::BandPass);
    }

    #[test]
    fn test_cutoff_skew_centre() {
        let range = ParamId::Cutoff.range();
        assert!((range.normalize(CUTOFF_CENTRE_HZ) - 0.5).abs() < 1e-4);
        assert!((range.unnormalize(0.5) - CUTOFF_CENTRE_HZ).abs() < 0.5);
        assert_eq!(range.unnormalize(0.0), CUTOFF_MIN_HZ);
        assert_eq!(range.unnormalize(1.0), CUTOFF_MAX_HZ);
    }

    #[test]
    fn test_subscribers_only_fire_on_change() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut store = ParameterStore::new();
        let counter = hits.clone();
        store.subscribe(move |id, value| {
            assert_eq!(id, ParamId::Resonance);
            assert!((RESONANCE_MIN..=RESONANCE_MAX).contains(&value));
            counter.fetch_add(1, Ordering::Relaxed);
        });

        store.set(ParamId::Resonance, 2.0);
        store.set(ParamId::Resonance, 2.0);
        store.set(ParamId::Resonance, 42.0);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_param_id_round_trip() {
        for id in ParamId::ALL {
            assert_eq!(ParamId::from_id(id.id()), Some(id));
        }
        assert_eq!(ParamId::from_id("gain"), None);
    }
}
