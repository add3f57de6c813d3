//! Impulse response engine and its control-side loader.
//!
//! Kernel replacement is double buffered. The control context builds a
//! complete `Convolver` (decoding, resampling, FFTs, state buffers), then
//! hands it over through a lock-free single-producer queue. The render
//! context picks it up only at the start of a block, so a kernel is never
//! swapped while a block is being convolved. The replaced kernel goes back
//! through a second queue and is freed on the control context.
//!
//! A kernel built for a sample rate the engine is no longer prepared for
//! (the loader read the rate just before `prepare` changed it) is never
//! installed. It goes back through the same return queue flagged for a
//! rebuild, and the loader requeues it at the current rate.

use crate::dsp::convolver::Convolver;
use crate::dsp::impulse_response::{ImpulseResponse, IrOptions};
use crate::dsp::ProcessSpec;
use crate::error::IrLoadError;
use crate::ir_file;
use crate::irv_log;
use assert_no_alloc::permit_alloc;
use ringbuf::{Consumer, Producer, RingBuffer};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Loads that may be in flight before the render context picks them up.
pub const PENDING_LOADS: usize = 4;
// Every kernel that can exist besides the active one fits in here.
const RETIRED_CAPACITY: usize = PENDING_LOADS + 1;

type KernelBox = Box<Convolver>;

/// A kernel on its way back to the control context.
struct Returned {
    kernel: KernelBox,
    /// Built for a stale sample rate and never installed.
    rebuild: bool,
}

/// Control-context handle for replacing the kernel.
pub struct IrLoader {
    pending: Producer<KernelBox>,
    retired: Consumer<Returned>,
    sample_rate: Arc<AtomicU32>,
}

impl IrLoader {
    /// Decodes `path` and installs it. Blocks on file I/O; never call from
    /// the render context.
    pub fn load_file(&mut self, path: &Path, options: IrOptions) -> Result<usize, IrLoadError> {
        let decoded = ir_file::decode_file(path)?;
        let ir = ImpulseResponse::prepare(decoded.channels, decoded.sample_rate as f32, options);
        log::info!(
            "Loaded impulse response {} ({} samples @ {} Hz)",
            path.display(),
            ir.len(),
            decoded.sample_rate
        );
        self.load(ir)
    }

    /// Builds a kernel for the current processing rate and queues it.
    /// Returns the kernel length in samples.
    pub fn load(&mut self, ir: ImpulseResponse) -> Result<usize, IrLoadError> {
        self.collect_garbage();
        if self.pending.is_full() {
            return Err(IrLoadError::QueueFull);
        }

        let convolver = self.build(Arc::new(ir))?;
        let len = convolver.ir_len();

        self.pending
            .push(convolver)
            .map_err(|_| IrLoadError::QueueFull)?;
        Ok(len)
    }

    fn target_rate(&self) -> f32 {
        f32::from_bits(self.sample_rate.load(Ordering::Acquire))
    }

    fn build(&self, source: Arc<ImpulseResponse>) -> Result<KernelBox, IrLoadError> {
        let target_rate = self.target_rate();
        let at_rate = if target_rate > 0.0 {
            source.resampled(target_rate)?
        } else {
            (*source).clone()
        };
        Ok(Box::new(Convolver::new(&at_rate, source)))
    }

    /// Frees kernels the render context has replaced and requeues, at the
    /// current rate, any it refused as stale. Returns how many were freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut freed = 0;
        while let Some(returned) = self.retired.pop() {
            if returned.rebuild {
                self.requeue(returned.kernel);
            } else {
                drop(returned.kernel);
                freed += 1;
            }
        }
        freed
    }

    fn requeue(&mut self, stale: KernelBox) {
        let source = stale.source().clone();
        let rebuilt = match self.build(source) {
            Ok(kernel) => kernel,
            Err(err) => {
                log::error!("Failed to rebuild impulse response: {}", err);
                return;
            }
        };
        log::debug!(
            "Rebuilt impulse response for {} Hz ({} samples)",
            rebuilt.sample_rate(),
            rebuilt.ir_len()
        );
        if self.pending.push(rebuilt).is_err() {
            log::warn!("Dropping rebuilt impulse response: newer loads are queued");
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

pub struct ImpulseResponseEngine {
    active: Option<KernelBox>,
    pending: Consumer<KernelBox>,
    retired: Producer<Returned>,
    sample_rate: Arc<AtomicU32>,
    spec: Option<ProcessSpec>,
    generation: u64,
    returned: u64,
}

impl ImpulseResponseEngine {
    /// A fresh engine has no kernel and passes audio through.
    pub fn new() -> (Self, IrLoader) {
        let (pending_tx, pending_rx) = RingBuffer::<KernelBox>::new(PENDING_LOADS).split();
        let (retired_tx, retired_rx) = RingBuffer::<Returned>::new(RETIRED_CAPACITY).split();
        let sample_rate = Arc::new(AtomicU32::new(0.0f32.to_bits()));

        let engine = Self {
            active: None,
            pending: pending_rx,
            retired: retired_tx,
            sample_rate: sample_rate.clone(),
            spec: None,
            generation: 0,
            returned: 0,
        };
        let loader = IrLoader {
            pending: pending_tx,
            retired: retired_rx,
            sample_rate,
        };
        (engine, loader)
    }

    /// Non-real-time. Takes any queued kernel, rebuilds the active one if the
    /// sample rate changed, and clears all convolution state.
    pub fn prepare(&mut self, spec: ProcessSpec) {
        self.sample_rate
            .store(spec.sample_rate.to_bits(), Ordering::Release);
        self.spec = Some(spec);

        while let Some(next) = self.pending.pop() {
            self.active = Some(next);
            self.generation += 1;
        }

        if let Some(active) = self.active.as_ref() {
            if (active.sample_rate() - spec.sample_rate).abs() >= 0.5 {
                let source = active.source().clone();
                match source.resampled(spec.sample_rate) {
                    Ok(at_rate) => {
                        self.active = Some(Box::new(Convolver::new(&at_rate, source)));
                        self.generation += 1;
                    }
                    Err(err) => {
                        log::warn!("Keeping impulse response at its old rate: {}", err);
                    }
                }
            }
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.reset();
        }
    }

    /// Non-real-time direct install (offline use, tests). Supersedes anything
    /// still queued by a loader.
    pub fn load(&mut self, ir: ImpulseResponse) -> Result<usize, IrLoadError> {
        while self.pending.pop().is_some() {}
        let source = Arc::new(ir);
        let at_rate = match self.spec {
            Some(spec) => source.resampled(spec.sample_rate)?,
            None => (*source).clone(),
        };
        let convolver = Convolver::new(&at_rate, source);
        let len = convolver.ir_len();
        self.active = Some(Box::new(convolver));
        self.generation += 1;
        Ok(len)
    }

    /// Block boundary: installs the newest queued kernel, if any.
    /// Returns true when a swap happened.
    pub fn begin_block(&mut self) -> bool {
        let mut swapped = false;
        while let Some(next) = self.pending.pop() {
            if !self.matches_rate(&next) {
                irv_log!("kernel at {} Hz returned for rebuild", next.sample_rate());
                self.send_back(next, true);
                continue;
            }
            if let Some(old) = self.active.replace(next) {
                self.send_back(old, false);
            }
            self.generation += 1;
            swapped = true;
        }
        if swapped {
            irv_log!(
                "kernel swap: generation {}, {} samples",
                self.generation,
                self.current_ir_size()
            );
        }
        swapped
    }

    fn matches_rate(&self, kernel: &Convolver) -> bool {
        match self.spec {
            Some(spec) => (kernel.sample_rate() - spec.sample_rate).abs() < 0.5,
            None => true,
        }
    }

    fn send_back(&mut self, kernel: KernelBox, rebuild: bool) {
        self.returned += 1;
        if let Err(returned) = self.retired.push(Returned { kernel, rebuild }) {
            // Loader stopped collecting; freeing here is the only option left.
            permit_alloc(|| drop(returned));
        }
    }

    /// Convolves one channel in place. Identity unless an IR longer than one
    /// sample is installed.
    #[inline]
    pub fn process_channel(&mut self, ch: usize, samples: &mut [f32]) {
        if self.current_ir_size() <= 1 {
            return;
        }
        if let Some(active) = self.active.as_mut() {
            active.process_channel(ch, samples);
        }
    }

    pub fn process(&mut self, block: &mut [&mut [f32]]) {
        self.begin_block();
        for (ch, samples) in block.iter_mut().enumerate() {
            self.process_channel(ch, samples);
        }
    }

    #[inline]
    pub fn current_ir_size(&self) -> usize {
        self.active.as_ref().map_or(0, |c| c.ir_len())
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Kernels handed back to the loader so far, replaced or refused.
    #[inline]
    pub fn returned(&self) -> u64 {
        self.returned
    }
}
