//! Render-safe diagnostics.
//!
//! `irv_log!` compiles to nothing unless the `debug` feature is enabled.
//! With the feature on, messages are formatted into fixed-size slots of a
//! single-producer ring so the render context never allocates or locks; the
//! control context drains the ring to a file.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const SLOTS: usize = 128;
    pub(super) const SLOT_BYTES: usize = 256;
    const LOG_FILE_NAME: &str = "irverb.log";

    #[derive(Copy, Clone)]
    pub(super) struct Slot {
        pub(super) len: usize,
        pub(super) bytes: [u8; SLOT_BYTES],
    }

    impl Slot {
        pub(super) const EMPTY: Slot = Slot {
            len: 0,
            bytes: [0; SLOT_BYTES],
        };
    }

    impl fmt::Write for Slot {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let mut n = s.len().min(SLOT_BYTES - self.len);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n;
            Ok(())
        }
    }

    struct Ring {
        write: AtomicUsize,
        read: AtomicUsize,
        dropped: AtomicU64,
        slots: Box<[UnsafeCell<Slot>]>,
    }

    // Single writer (render context) and single reader (control context),
    // synchronised through the acquire/release index pair.
    unsafe impl Sync for Ring {}

    impl Ring {
        fn new() -> Self {
            Self {
                write: AtomicUsize::new(0),
                read: AtomicUsize::new(0),
                dropped: AtomicU64::new(0),
                slots: (0..SLOTS).map(|_| UnsafeCell::new(Slot::EMPTY)).collect(),
            }
        }

        fn push(&self, slot: &Slot) {
            let write = self.write.load(Ordering::Relaxed);
            let next = (write + 1) % SLOTS;
            if next == self.read.load(Ordering::Acquire) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            unsafe {
                *self.slots[write].get() = *slot;
            }
            self.write.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<Slot> {
            let read = self.read.load(Ordering::Relaxed);
            if read == self.write.load(Ordering::Acquire) {
                return None;
            }
            let slot = unsafe { *self.slots[read].get() };
            self.read.store((read + 1) % SLOTS, Ordering::Release);
            Some(slot)
        }
    }

    static RING: OnceLock<Ring> = OnceLock::new();
    static ENABLED: AtomicBool = AtomicBool::new(false);

    /// Must run on the control context before the first render call.
    pub fn init_logger() {
        let _ = RING.get_or_init(Ring::new);
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn log_args(args: fmt::Arguments) {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        if let Some(ring) = RING.get() {
            let mut slot = Slot::EMPTY;
            let _ = fmt::write(&mut slot, args);
            ring.push(&slot);
        }
    }

    /// Appends pending messages to `<tmp>/irverb.log`. Returns how many were written.
    pub fn drain_to_file() -> usize {
        let Some(ring) = RING.get() else {
            return 0;
        };
        let path = std::env::temp_dir().join(LOG_FILE_NAME);
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) else {
            return 0;
        };

        let mut written = 0;
        while let Some(slot) = ring.pop() {
            let msg = std::str::from_utf8(&slot.bytes[..slot.len]).unwrap_or("<invalid utf-8>");
            if writeln!(file, "{}", msg).is_ok() {
                written += 1;
            }
        }
        let dropped = ring.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            let _ = writeln!(file, "({} messages dropped, ring full)", dropped);
        }
        written
    }
}


#[cfg(feature = "debug")]
pub(crate) fn irv_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn irv_log_inner(_args: fmt::Arguments) {}

#[macro_export]
macro_rules! irv_log {
    ($($arg:tt)*) => {
        $crate::debug::irv_log_inner(format_args!($($arg)*))
    };
}
