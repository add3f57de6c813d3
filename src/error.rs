//! Error types for the control context.
//!
//! Nothing here is ever produced on the render path. Render-side failures
//! degrade to pass-through instead of surfacing as errors.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a file (or a decoded buffer) into an installed kernel.
#[derive(Error, Debug)]
pub enum IrLoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Compressed audio decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("Unsupported impulse response format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("No decodable audio track in {path}")]
    NoAudioTrack { path: PathBuf },

    #[error("Impulse response contains no samples")]
    Empty,

    #[error("Resampling failed: {reason}")]
    Resample { reason: String },

    #[error("Kernel handoff queue is full, the render context has not picked up earlier loads")]
    QueueFull,

    #[error("Impulse response loader is poisoned by an earlier panic")]
    LoaderPoisoned,
}

/// Rejected host bus configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Layout not supported: {channels} channels (only mono or stereo)")]
    UnsupportedChannelCount { channels: u32 },

    #[error("Layout not supported: input has {input} channels, output has {output}")]
    Mismatch { input: u32, output: u32 },
}

/// Failure to restore persisted plugin state.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported state version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}
