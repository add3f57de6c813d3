//! Zero-latency uniformly partitioned FFT convolution.
//!
//! The impulse response is cut into partitions of `PARTITION_SIZE` samples,
//! each transformed once at build time. Input is collected into a block of
//! the same size; every call transforms the partially filled block, so output
//! is produced for exactly the samples that came in (no added latency).
//!
//! The contribution of older input blocks is spread over the block that is
//! filling: each call sums a share of the older partitions proportional to
//! the samples it consumed, into a back buffer that becomes the tail sum at
//! the next partition boundary. Only the newest block's product with the
//! second partition is left for the boundary itself, so per-call work stays
//! proportional to the call length however long the IR is.
//!
//! Output equals the linear convolution of the whole input stream with the
//! impulse response: the second half of each block's inverse transform is
//! carried into the next block, so block boundaries are seamless.
//!
//! # Design Notes
//! - `Convolver::new` allocates everything; `process` and `reset` never do.
//! - The kernel is immutable after construction. Replacing the IR means
//!   building a new `Convolver` on the control context.

use crate::dsp::impulse_response::{ImpulseResponse, IR_CHANNELS};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

pub const PARTITION_SIZE: usize = 256;
const FFT_SIZE: usize = PARTITION_SIZE * 2;

/// Frequency-domain partitions of one IR channel.
struct Kernel {
    partitions: Vec<Vec<Complex<f32>>>,
}

impl Kernel {
    fn new(samples: &[f32], fft: &Arc<dyn Fft<f32>>, scratch: &mut [Complex<f32>]) -> Self {
        let partitions = samples
            .chunks(PARTITION_SIZE)
            .map(|chunk| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); FFT_SIZE];
                for (bin, &s) in spectrum.iter_mut().zip(chunk) {
                    bin.re = s;
                }
                fft.process_with_scratch(&mut spectrum, scratch);
                spectrum
            })
            .collect();
        Self { partitions }
    }
}

/// Running state for one audio channel.
struct ChannelState {
    input: Vec<f32>,
    fill: usize,
    current: Vec<Complex<f32>>,
    // Spectra of past input blocks, most recent at `head`.
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    // Sum of history * partitions[1..], constant while a block fills.
    accum: Vec<Complex<f32>>,
    // Tail sum for the following block, built up while this one fills.
    next: Vec<Complex<f32>>,
    // Next partition index (from 2) to add into `next`.
    next_partition: usize,
    overlap: Vec<f32>,
}

impl ChannelState {
    fn new(num_partitions: usize) -> Self {
        Self {
            input: vec![0.0; PARTITION_SIZE],
            fill: 0,
            current: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            history: vec![vec![Complex::new(0.0, 0.0); FFT_SIZE]; num_partitions.max(1)],
            head: 0,
            accum: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            next: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            next_partition: 2,
            overlap: vec![0.0; PARTITION_SIZE],
        }
    }

    fn reset(&mut self) {
        self.input.fill(0.0);
        self.fill = 0;
        self.head = 0;
        for spectrum in &mut self.history {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.accum.fill(Complex::new(0.0, 0.0));
        self.next.fill(Complex::new(0.0, 0.0));
        self.next_partition = 2;
        self.overlap.fill(0.0);
    }

    /// Adds partitions `next_partition..upto` into the back buffer.
    fn accumulate_next(&mut self, kernel: &Kernel, upto: usize) {
        let slots = self.history.len();
        let upto = upto.min(kernel.partitions.len());
        while self.next_partition < upto {
            let k = self.next_partition;
            // Still relative to the block before the one filling now.
            let past = &self.history[(self.head + slots - (k - 2)) % slots];
            for ((acc, x), h) in self.next.iter_mut().zip(past).zip(&kernel.partitions[k]) {
                *acc += x * h;
            }
            self.next_partition += 1;
        }
    }

    /// Older partitions that should be summed once `fill` samples are in.
    fn deferred_target(num_partitions: usize, fill: usize) -> usize {
        let deferred = num_partitions.saturating_sub(2);
        2 + (deferred * fill).div_ceil(PARTITION_SIZE)
    }

    /// Called after a block completes: its spectrum becomes history and the
    /// back buffer, plus the newest block times the second partition,
    /// becomes the tail sum for the next block.
    fn advance(&mut self, kernel: &Kernel) {
        self.accumulate_next(kernel, kernel.partitions.len());

        let slots = self.history.len();
        self.head = (self.head + 1) % slots;
        std::mem::swap(&mut self.current, &mut self.history[self.head]);

        std::mem::swap(&mut self.accum, &mut self.next);
        if let Some(partition) = kernel.partitions.get(1) {
            let newest = &self.history[self.head];
            for ((acc, x), h) in self.accum.iter_mut().zip(newest).zip(partition) {
                *acc += x * h;
            }
        }
        self.next.fill(Complex::new(0.0, 0.0));
        self.next_partition = 2;

        self.input.fill(0.0);
        self.fill = 0;
    }
}

pub struct Convolver {
    source: Arc<ImpulseResponse>,
    ir_len: usize,
    sample_rate: f32,
    kernels: Vec<Kernel>,
    states: Vec<ChannelState>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    ifft_scratch: Vec<Complex<f32>>,
}

impl Convolver {
    /// Builds a kernel from `ir` (already at the processing sample rate).
    /// `source` is the response as loaded, kept so the kernel can be rebuilt
    /// for another sample rate.
    pub fn new(ir: &ImpulseResponse, source: Arc<ImpulseResponse>) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let ifft = planner.plan_fft_inverse(FFT_SIZE);

        let mut fft_scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let ifft_scratch = vec![Complex::default(); ifft.get_inplace_scratch_len()];

        let kernels: Vec<Kernel> = (0..IR_CHANNELS)
            .map(|ch| Kernel::new(ir.channel(ch), &fft, &mut fft_scratch))
            .collect();
        let num_partitions = kernels[0].partitions.len();

        Self {
            source,
            ir_len: ir.len(),
            sample_rate: ir.sample_rate(),
            kernels,
            states: (0..IR_CHANNELS)
                .map(|_| ChannelState::new(num_partitions))
                .collect(),
            fft,
            ifft,
            spectrum: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            fft_scratch,
            ifft_scratch,
        }
    }

    /// Convenience for a response that is already at the target rate.
    pub fn from_ir(ir: ImpulseResponse) -> Self {
        let source = Arc::new(ir);
        Self::new(&source, source.clone())
    }

    #[inline]
    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    /// Rate the kernel was built for (not necessarily the source file's).
    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn source(&self) -> &Arc<ImpulseResponse> {
        &self.source
    }

    pub fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }

    /// Convolves `samples` in place. Channel indices past the IR's channel
    /// count are left untouched.
    pub fn process_channel(&mut self, ch: usize, samples: &mut [f32]) {
        if ch >= self.states.len() || self.ir_len == 0 {
            return;
        }
        let kernel = &self.kernels[ch];
        let state = &mut self.states[ch];
        let norm = 1.0 / FFT_SIZE as f32;

        let mut done = 0;
        while done < samples.len() {
            let n = (PARTITION_SIZE - state.fill).min(samples.len() - done);
            let start = state.fill;
            state.input[start..start + n].copy_from_slice(&samples[done..done + n]);

            // Transform the (zero padded) block as filled so far.
            for (bin, &s) in state.current.iter_mut().zip(&state.input) {
                *bin = Complex::new(s, 0.0);
            }
            state.current[PARTITION_SIZE..].fill(Complex::new(0.0, 0.0));
            #[cfg(debug_assertions)]
            assert_no_alloc::assert_no_alloc(|| {
                self.fft
                    .process_with_scratch(&mut state.current, &mut self.fft_scratch);
            });
            #[cfg(not(debug_assertions))]
            self.fft
                .process_with_scratch(&mut state.current, &mut self.fft_scratch);

            for (((y, x), h), acc) in self
                .spectrum
                .iter_mut()
                .zip(&state.current)
                .zip(&kernel.partitions[0])
                .zip(&state.accum)
            {
                *y = x * h + acc;
            }
            self.ifft
                .process_with_scratch(&mut self.spectrum, &mut self.ifft_scratch);

            for i in 0..n {
                samples[done + i] = self.spectrum[start + i].re * norm + state.overlap[start + i];
            }

            state.fill += n;
            done += n;

            let target = ChannelState::deferred_target(kernel.partitions.len(), state.fill);
            state.accumulate_next(kernel, target);

            if state.fill == PARTITION_SIZE {
                for (o, y) in state
                    .overlap
                    .iter_mut()
                    .zip(&self.spectrum[PARTITION_SIZE..])
                {
                    *o = y.re * norm;
                }
                state.advance(kernel);
            }
        }
    }
}
