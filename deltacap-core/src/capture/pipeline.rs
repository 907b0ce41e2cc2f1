//! The capture thread's cycle loop.
//!
//! Each cycle:
//!
//! 1. Acquire from the [`FrameSource`] with a bounded wait.
//! 2. Copy a changed frame into `current` (unchanged: `current` already
//!    equals `previous`).
//! 3. XOR `current` against `previous` into `delta`.
//! 4. Compress `delta`; a failure drops this frame only.
//! 5. Hand an owned [`CapturedFrame`] to the [`DispatchPool`].
//! 6. Copy `current` into `previous`.
//! 7. Sleep until the cycle's deadline or until stop is requested.
//!
//! Only acquisition errors and access loss end the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{error, trace, warn};

use crate::capture::compress::Compress;
use crate::capture::delta::xor_delta;
use crate::capture::pacing::{FramePacer, StopSignal};
use crate::capture::session::{FrameConsumer, UnchangedPolicy};
use crate::capture::source::{Acquired, FrameSource};
use crate::capture::types::{CapturedFrame, FrameBuffer, FrameDescriptor, epoch_millis};
use crate::error::CaptureError;
use crate::task::DispatchPool;

// ── Buffers ──────────────────────────────────────────────────────

/// Frame storage owned by one session between `initialize` and `stop`.
///
/// Invariant: `current`, `previous` and `delta` are all exactly
/// `descriptor.frame_size()` bytes long, and at the top of every cycle
/// `current == previous`.
#[derive(Debug)]
pub struct Buffers {
    pub(crate) descriptor: FrameDescriptor,
    pub(crate) current: FrameBuffer,
    pub(crate) previous: FrameBuffer,
    pub(crate) delta: FrameBuffer,
    /// Compressor output, reused across cycles.
    pub(crate) compressed: Vec<u8>,
}

impl Buffers {
    pub fn new(descriptor: FrameDescriptor) -> Self {
        Self {
            current: FrameBuffer::new(&descriptor),
            previous: FrameBuffer::new(&descriptor),
            delta: FrameBuffer::new(&descriptor),
            compressed: Vec::new(),
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }
}

// ── Statistics ───────────────────────────────────────────────────

/// Point-in-time copy of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Cycles started.
    pub cycles: u64,
    /// Cycles whose source reported a new frame that was copied.
    pub frames_changed: u64,
    /// Cycles whose source reported no change.
    pub frames_unchanged: u64,
    /// Frames handed to the dispatch pool.
    pub frames_dispatched: u64,
    /// Unchanged cycles skipped under [`UnchangedPolicy::Suppress`].
    pub frames_suppressed: u64,
    /// Changed frames whose copy into system memory failed.
    pub copy_failures: u64,
    /// Frames dropped because compression failed.
    pub compression_failures: u64,
    /// Sum of delta sizes that went through the compressor.
    pub bytes_uncompressed: u64,
    /// Sum of compressed payload sizes dispatched.
    pub bytes_compressed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    cycles: AtomicU64,
    frames_changed: AtomicU64,
    frames_unchanged: AtomicU64,
    frames_dispatched: AtomicU64,
    frames_suppressed: AtomicU64,
    copy_failures: AtomicU64,
    compression_failures: AtomicU64,
    bytes_uncompressed: AtomicU64,
    bytes_compressed: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> SessionStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SessionStats {
            cycles: get(&self.cycles),
            frames_changed: get(&self.frames_changed),
            frames_unchanged: get(&self.frames_unchanged),
            frames_dispatched: get(&self.frames_dispatched),
            frames_suppressed: get(&self.frames_suppressed),
            copy_failures: get(&self.copy_failures),
            compression_failures: get(&self.compression_failures),
            bytes_uncompressed: get(&self.bytes_uncompressed),
            bytes_compressed: get(&self.bytes_compressed),
        }
    }
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Everything the capture thread owns for one `start`.
pub(crate) struct CaptureLoop<S: FrameSource> {
    pub(crate) source: Arc<Mutex<S>>,
    pub(crate) buffers: Buffers,
    pub(crate) compressor: Box<dyn Compress>,
    pub(crate) pacer: FramePacer,
    pub(crate) acquire_timeout: Duration,
    pub(crate) unchanged: UnchangedPolicy,
    pub(crate) consumer: Arc<dyn FrameConsumer>,
    pub(crate) pool: Arc<DispatchPool>,
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) capturing: Arc<AtomicBool>,
    pub(crate) stats: Arc<StatsCounters>,
}

/// What a single cycle asks the loop to do next.
enum Next {
    Continue,
    Exit,
}

impl<S: FrameSource> CaptureLoop<S> {
    /// Run cycles until stopped or the source fails, then hand the
    /// buffers back so `stop` can release them.
    pub(crate) fn run(mut self) -> Buffers {
        let source = Arc::clone(&self.source);
        let mut source = source.lock();
        let mut frame_number = 0u64;

        while !self.stop.is_triggered() {
            let cycle_start = Instant::now();
            if let Next::Exit = self.cycle(&mut *source, &mut frame_number) {
                break;
            }
            if self.pacer.pace(cycle_start, &self.stop) {
                break;
            }
        }

        self.capturing.store(false, Ordering::SeqCst);
        trace!(frames = frame_number, "capture loop exited");
        self.buffers
    }

    fn cycle(&mut self, source: &mut S, frame_number: &mut u64) -> Next {
        let timestamp_ms = epoch_millis();
        bump(&self.stats.cycles, 1);

        let unchanged = match source.acquire_next(self.acquire_timeout) {
            Ok(Acquired::Changed(frame)) => {
                match source.copy_to_system_memory(frame, &mut self.buffers.current) {
                    Ok(()) => false,
                    Err(e) if e.is_fatal() => {
                        error!("frame copy failed fatally: {e}");
                        return Next::Exit;
                    }
                    Err(e) => {
                        warn!("frame copy failed, skipping cycle: {e}");
                        bump(&self.stats.copy_failures, 1);
                        // A partial copy must not leak into the next delta.
                        self.buffers.current.copy_from(&self.buffers.previous);
                        return Next::Continue;
                    }
                }
            }
            Ok(Acquired::Unchanged) => true,
            Err(e) => {
                error!("frame acquisition failed, stopping capture: {e}");
                return Next::Exit;
            }
        };

        if self.stop.is_triggered() {
            return Next::Exit;
        }

        if unchanged {
            bump(&self.stats.frames_unchanged, 1);
            if self.unchanged == UnchangedPolicy::Suppress {
                bump(&self.stats.frames_suppressed, 1);
                trace!("unchanged frame suppressed");
                return Next::Continue;
            }
        } else {
            bump(&self.stats.frames_changed, 1);
        }

        let number = *frame_number;
        *frame_number += 1;
        match self.encode(number, timestamp_ms, unchanged) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => {
                warn!(frame = number, "dropping frame: {e}");
                bump(&self.stats.compression_failures, 1);
            }
        }

        if !unchanged {
            self.buffers.previous.copy_from(&self.buffers.current);
        }
        Next::Continue
    }

    /// Delta + compress into an owned frame.
    fn encode(
        &mut self,
        frame_number: u64,
        timestamp_ms: u64,
        unchanged: bool,
    ) -> Result<CapturedFrame, CaptureError> {
        let b = &mut self.buffers;
        xor_delta(&b.current, &b.previous, &mut b.delta)?;
        let size = self.compressor.compress(&b.delta, &mut b.compressed)?;
        bump(&self.stats.bytes_uncompressed, b.delta.len() as u64);

        Ok(CapturedFrame {
            frame_number,
            data: Bytes::copy_from_slice(&b.compressed[..size]),
            data_size: size,
            uncompressed_size: b.delta.len(),
            width: b.descriptor.width,
            height: b.descriptor.height,
            frame_rate: b.descriptor.frame_rate,
            timestamp_ms,
            unchanged,
        })
    }

    fn dispatch(&self, frame: CapturedFrame) {
        let number = frame.frame_number;
        let size = frame.data_size as u64;
        let consumer = Arc::clone(&self.consumer);
        match self.pool.enqueue(move || consumer.on_frame(frame)) {
            Ok(()) => {
                bump(&self.stats.frames_dispatched, 1);
                bump(&self.stats.bytes_compressed, size);
                trace!(frame = number, bytes = size, "frame dispatched");
            }
            Err(e) => warn!(frame = number, "frame not dispatched: {e}"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
