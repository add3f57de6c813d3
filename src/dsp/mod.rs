pub mod convolver;
pub mod impulse_response;
pub mod ir_engine;
pub mod mix;
pub mod pipeline;
pub mod svf;
pub mod utils;

pub use convolver::{Convolver, PARTITION_SIZE};
pub use impulse_response::{ImpulseResponse, IrOptions};
pub use ir_engine::{ImpulseResponseEngine, IrLoader, PENDING_LOADS};
pub use mix::MixStage;
pub use pipeline::{ChannelLayout, ProcessSpec, ProcessingPipeline, MAX_CHANNELS};
pub use svf::{FilterStage, FilterState, SvfCoefficients};
