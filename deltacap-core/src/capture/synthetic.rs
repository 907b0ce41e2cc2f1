//! Frame sources that do not need a GPU.
//!
//! - [`ScriptedSource`] replays a fixed list of acquisition outcomes and
//!   records how it was driven. The integration tests use it to inject
//!   unchanged frames, single-pixel edits and access loss.
//! - [`PatternSource`] renders a moving bar over a gradient, for running
//!   the agent on machines without a capturable desktop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::capture::source::{Acquired, FrameSource};
use crate::capture::types::{BYTES_PER_PIXEL, FrameDescriptor};
use crate::error::SourceError;

// ── Step ─────────────────────────────────────────────────────────

/// One scripted acquisition outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A changed frame with these exact pixels.
    Frame(Vec<u8>),
    /// No change within the timeout.
    Unchanged,
    /// The source lost access (fatal).
    AccessLost,
    /// Acquisition failed with an unrecoverable error (fatal).
    Fail(String),
    /// A frame is acquired but copying it fails (cycle is skipped).
    CopyFail,
}

// ── SourceProbe ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ProbeCounters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    acquisitions: AtomicU64,
    copies: AtomicU64,
    held: AtomicUsize,
}

/// Read-only view of how a [`ScriptedSource`] has been driven.
///
/// Clones share the same counters, so a test can keep a probe after
/// moving the source into a session.
#[derive(Debug, Clone, Default)]
pub struct SourceProbe {
    counters: Arc<ProbeCounters>,
}

impl SourceProbe {
    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> u64 {
        self.counters.acquisitions.load(Ordering::SeqCst)
    }

    /// Successful copies into system memory.
    pub fn copies(&self) -> u64 {
        self.counters.copies.load(Ordering::SeqCst)
    }

    /// Frames acquired but not yet released.
    pub fn frames_held(&self) -> usize {
        self.counters.held.load(Ordering::SeqCst)
    }
}

// ── ScriptedSource ───────────────────────────────────────────────

/// Handle to a scripted frame; releases itself when dropped.
#[derive(Debug)]
pub struct ScriptedFrame {
    pixels: Option<Vec<u8>>,
    counters: Arc<ProbeCounters>,
}

impl Drop for ScriptedFrame {
    fn drop(&mut self) {
        self.counters.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Replays [`Step`]s in order, then repeats a fallback step forever.
#[derive(Debug)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    fallback: Step,
    acquire_delay: Duration,
    open_error: Option<SourceError>,
    descriptor: Option<FrameDescriptor>,
    probe: SourceProbe,
}

impl ScriptedSource {
    /// A source that plays `steps` and then reports `Unchanged`.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            fallback: Step::Unchanged,
            acquire_delay: Duration::ZERO,
            open_error: None,
            descriptor: None,
            probe: SourceProbe::default(),
        }
    }

    /// Step returned once the script is exhausted.
    pub fn then(mut self, fallback: Step) -> Self {
        self.fallback = fallback;
        self
    }

    /// Sleep up to `delay` (capped at the acquire timeout) on every
    /// acquisition, like a real source blocking for the next frame.
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    /// Make `open` fail with `error`.
    pub fn failing_open(mut self, error: SourceError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Handle for observing this source after it has been moved.
    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }

    fn hold(&self, pixels: Option<Vec<u8>>) -> ScriptedFrame {
        self.probe.counters.held.fetch_add(1, Ordering::SeqCst);
        ScriptedFrame {
            pixels,
            counters: Arc::clone(&self.probe.counters),
        }
    }
}

impl FrameSource for ScriptedSource {
    type Frame = ScriptedFrame;

    fn open(&mut self, descriptor: &FrameDescriptor) -> Result<(), SourceError> {
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        self.descriptor = Some(*descriptor);
        self.probe.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn acquire_next(&mut self, timeout: Duration) -> Result<Acquired<ScriptedFrame>, SourceError> {
        if self.descriptor.is_none() {
            return Err(SourceError::Failed("source is not open".into()));
        }
        self.probe.counters.acquisitions.fetch_add(1, Ordering::SeqCst);
        if !self.acquire_delay.is_zero() {
            thread::sleep(self.acquire_delay.min(timeout));
        }

        let step = self
            .steps
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Frame(pixels) => Ok(Acquired::Changed(self.hold(Some(pixels)))),
            Step::CopyFail => Ok(Acquired::Changed(self.hold(None))),
            Step::Unchanged => Ok(Acquired::Unchanged),
            Step::AccessLost => Err(SourceError::AccessLost),
            Step::Fail(msg) => Err(SourceError::Failed(msg)),
        }
    }

    fn copy_to_system_memory(
        &mut self,
        frame: ScriptedFrame,
        dest: &mut [u8],
    ) -> Result<(), SourceError> {
        let Some(pixels) = frame.pixels.as_deref() else {
            return Err(SourceError::Failed("scripted copy failure".into()));
        };
        if pixels.len() != dest.len() {
            return Err(SourceError::Failed(format!(
                "scripted frame is {} bytes, destination is {}",
                pixels.len(),
                dest.len()
            )));
        }
        dest.copy_from_slice(pixels);
        self.probe.counters.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if self.descriptor.take().is_some() {
            self.probe.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ── PatternSource ────────────────────────────────────────────────

/// Animated test pattern: a gradient with a vertical bar sweeping
/// across it.
#[derive(Debug)]
pub struct PatternSource {
    descriptor: Option<FrameDescriptor>,
    background: Vec<u8>,
    tick: u64,
    /// Only every `change_every`-th acquisition produces a new frame.
    change_every: u64,
    bar_width: u32,
}

impl PatternSource {
    pub fn new() -> Self {
        Self {
            descriptor: None,
            background: Vec::new(),
            tick: 0,
            change_every: 1,
            bar_width: 16,
        }
    }

    /// Report `Unchanged` except on every `n`-th acquisition, to mimic a
    /// mostly idle desktop.
    pub fn change_every(mut self, n: u64) -> Self {
        self.change_every = n.max(1);
        self
    }

    fn render_background(desc: &FrameDescriptor) -> Vec<u8> {
        let (w, h) = (desc.width as usize, desc.height as usize);
        let mut data = vec![0u8; desc.frame_size()];
        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) * BYTES_PER_PIXEL;
                data[idx] = ((x * 255) / w.max(1)) as u8;
                data[idx + 1] = ((y * 255) / h.max(1)) as u8;
                data[idx + 2] = 96;
                data[idx + 3] = 255;
            }
        }
        data
    }
}

impl Default for PatternSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for PatternSource {
    /// Animation tick the frame was acquired at.
    type Frame = u64;

    fn open(&mut self, descriptor: &FrameDescriptor) -> Result<(), SourceError> {
        self.background = Self::render_background(descriptor);
        self.descriptor = Some(*descriptor);
        self.tick = 0;
        Ok(())
    }

    fn acquire_next(&mut self, _timeout: Duration) -> Result<Acquired<u64>, SourceError> {
        if self.descriptor.is_none() {
            return Err(SourceError::Failed("pattern source is not open".into()));
        }
        let tick = self.tick;
        self.tick += 1;
        if tick % self.change_every == 0 {
            Ok(Acquired::Changed(tick / self.change_every))
        } else {
            Ok(Acquired::Unchanged)
        }
    }

    fn copy_to_system_memory(&mut self, frame: u64, dest: &mut [u8]) -> Result<(), SourceError> {
        let desc = self
            .descriptor
            .ok_or_else(|| SourceError::Failed("pattern source is not open".into()))?;
        if dest.len() != self.background.len() {
            return Err(SourceError::Failed("destination size mismatch".into()));
        }
        dest.copy_from_slice(&self.background);

        let w = desc.width as u64;
        let bar_x = ((frame * 8) % w) as usize;
        let bar_end = (bar_x + self.bar_width as usize).min(desc.width as usize);
        let row = desc.row_bytes();
        for y in 0..desc.height as usize {
            let start = y * row + bar_x * BYTES_PER_PIXEL;
            let end = y * row + bar_end * BYTES_PER_PIXEL;
            dest[start..end].fill(0xFF);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.descriptor = None;
        self.background = Vec::new();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> FrameDescriptor {
        FrameDescriptor::new(8, 4, 30).unwrap()
    }

    #[test]
    fn scripted_source_replays_then_falls_back() {
        let d = desc();
        let mut src = ScriptedSource::new([Step::Frame(vec![9; d.frame_size()]), Step::Unchanged])
            .then(Step::AccessLost);
        let probe = src.probe();
        src.open(&d).unwrap();

        let mut dest = vec![0u8; d.frame_size()];
        match src.acquire_next(Duration::from_millis(1)).unwrap() {
            Acquired::Changed(frame) => {
                assert_eq!(probe.frames_held(), 1);
                src.copy_to_system_memory(frame, &mut dest).unwrap();
            }
            Acquired::Unchanged => panic!("expected a frame"),
        }
        assert_eq!(probe.frames_held(), 0);
        assert!(dest.iter().all(|&b| b == 9));

        assert!(!src.acquire_next(Duration::from_millis(1)).unwrap().is_changed());
        assert_eq!(
            src.acquire_next(Duration::from_millis(1)).unwrap_err(),
            SourceError::AccessLost
        );
        assert_eq!(probe.acquisitions(), 3);
        assert_eq!(probe.copies(), 1);
    }

    #[test]
    fn dropped_handle_is_released() {
        let d = desc();
        let mut src = ScriptedSource::new([Step::CopyFail]);
        let probe = src.probe();
        src.open(&d).unwrap();
        let acquired = src.acquire_next(Duration::ZERO).unwrap();
        assert_eq!(probe.frames_held(), 1);
        drop(acquired);
        assert_eq!(probe.frames_held(), 0);
    }

    #[test]
    fn copy_failure_releases_the_frame() {
        let d = desc();
        let mut src = ScriptedSource::new([Step::CopyFail]);
        let probe = src.probe();
        src.open(&d).unwrap();
        let Acquired::Changed(frame) = src.acquire_next(Duration::ZERO).unwrap() else {
            panic!("expected a frame");
        };
        let err = src
            .copy_to_system_memory(frame, &mut vec![0u8; d.frame_size()])
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(probe.frames_held(), 0);
    }

    #[test]
    fn close_is_idempotent_and_counted_once() {
        let mut src = ScriptedSource::new([]);
        let probe = src.probe();
        src.open(&desc()).unwrap();
        src.close();
        src.close();
        assert_eq!(probe.opens(), 1);
        assert_eq!(probe.closes(), 1);
        assert!(src.acquire_next(Duration::ZERO).is_err());
    }

    #[test]
    fn failing_open() {
        let mut src =
            ScriptedSource::new([]).failing_open(SourceError::Unavailable("no gpu".into()));
        assert!(src.open(&desc()).is_err());
        assert_eq!(src.probe().opens(), 0);
    }

    #[test]
    fn pattern_source_moves_the_bar() {
        let d = FrameDescriptor::new(64, 8, 30).unwrap();
        let mut src = PatternSource::new();
        src.open(&d).unwrap();

        let mut a = vec![0u8; d.frame_size()];
        let mut b = vec![0u8; d.frame_size()];
        let Acquired::Changed(t0) = src.acquire_next(Duration::ZERO).unwrap() else {
            panic!("expected a frame");
        };
        src.copy_to_system_memory(t0, &mut a).unwrap();
        let Acquired::Changed(t1) = src.acquire_next(Duration::ZERO).unwrap() else {
            panic!("expected a frame");
        };
        src.copy_to_system_memory(t1, &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn pattern_source_idles_between_changes() {
        let mut src = PatternSource::new().change_every(3);
        src.open(&desc()).unwrap();
        let changed: Vec<bool> = (0..6)
            .map(|_| src.acquire_next(Duration::ZERO).unwrap().is_changed())
            .collect();
        assert_eq!(changed, [true, false, false, true, false, false]);
    }
}
