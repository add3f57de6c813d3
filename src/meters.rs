//! Engine status published by the render context.
//!
//! Atomic f32/u32 storage lets the control context (editor, background
//! tasks, offline tool) observe what the render context is doing without
//! locks. Everything is written once per block.

use crate::dsp::utils::{gain_to_db, peak};
use crate::dsp::FilterState;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub const METER_FLOOR_DB: f32 = -80.0;

pub struct EngineStatus {
    active_ir_len: AtomicU32,
    filter_state: AtomicU32,
    kernel_generation: AtomicU64,
    param_changes: AtomicU64,
    input_peak_db: AtomicU32,
    output_peak_db: AtomicU32,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineStatus {
    pub fn new() -> Self {
        Self {
            active_ir_len: AtomicU32::new(0),
            filter_state: AtomicU32::new(FilterState::Bypassed as u32),
            kernel_generation: AtomicU64::new(0),
            param_changes: AtomicU64::new(0),
            input_peak_db: AtomicU32::new(METER_FLOOR_DB.to_bits()),
            output_peak_db: AtomicU32::new(METER_FLOOR_DB.to_bits()),
        }
    }

    pub fn set_active_ir_len(&self, len: usize) {
        self.active_ir_len
            .store(len.min(u32::MAX as usize) as u32, Ordering::Relaxed);
    }

    pub fn set_filter_state(&self, state: FilterState) {
        self.filter_state.store(state as u32, Ordering::Relaxed);
    }

    pub fn set_kernel_generation(&self, generation: u64) {
        self.kernel_generation.store(generation, Ordering::Release);
    }

    /// Safe from any context, including the render thread.
    pub fn record_param_change(&self) {
        self.param_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_input_peak_db(&self, val: f32) {
        self.input_peak_db.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_peak_db(&self, val: f32) {
        self.output_peak_db.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn get_active_ir_len(&self) -> usize {
        self.active_ir_len.load(Ordering::Relaxed) as usize
    }

    pub fn get_filter_state(&self) -> FilterState {
        FilterState::from_u32(self.filter_state.load(Ordering::Relaxed))
    }

    /// Bumped each time the render context installs a new kernel.
    pub fn get_kernel_generation(&self) -> u64 {
        self.kernel_generation.load(Ordering::Acquire)
    }

    pub fn get_param_changes(&self) -> u64 {
        self.param_changes.load(Ordering::Relaxed)
    }

    pub fn get_input_peak_db(&self) -> f32 {
        f32::from_bits(self.input_peak_db.load(Ordering::Relaxed))
    }

    pub fn get_output_peak_db(&self) -> f32 {
        f32::from_bits(self.output_peak_db.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set_input_peak_db(METER_FLOOR_DB);
        self.set_output_peak_db(METER_FLOOR_DB);
    }
}

/// Peak of a block in dBFS, floored at `METER_FLOOR_DB`.
#[inline]
pub fn peak_db(samples: &[f32]) -> f32 {
    gain_to_db(peak(samples), METER_FLOOR_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_idle() {
        let status = EngineStatus::new();
        assert_eq!(status.get_active_ir_len(), 0);
        assert_eq!(status.get_filter_state(), FilterState::Bypassed);
        assert_eq!(status.get_input_peak_db(), METER_FLOOR_DB);
    }

    #[test]
    fn test_peak_db() {
        assert!((peak_db(&[0.0, -1.0, 0.5]) - 0.0).abs() < 1e-6);
        assert_eq!(peak_db(&[0.0; 8]), METER_FLOOR_DB);
    }

    #[test]
    fn test_filter_state_round_trips_through_atomic() {
        let status = EngineStatus::new();
        status.set_filter_state(FilterState::BandPass);
        assert_eq!(status.get_filter_state(), FilterState::BandPass);
    }
}
