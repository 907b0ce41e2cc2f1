//! Capture session: lifecycle and ownership of the capture thread.
//!
//! A session owns one [`FrameSource`], the frame buffers, and a handle
//! to a [`DispatchPool`]. `initialize` brings the source up and
//! allocates buffers, `start` spawns the capture thread, and `stop`
//! joins it and releases the source. All control methods take `&self`
//! so a session can be shared and stopped from any thread.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use crate::capture::compress::{DEFAULT_LEVEL, FrameCompressor};
use crate::capture::pacing::{FramePacer, StopSignal};
use crate::capture::pipeline::{Buffers, CaptureLoop, SessionStats, StatsCounters};
use crate::capture::source::FrameSource;
use crate::capture::types::{CapturedFrame, FrameDescriptor, SessionState};
use crate::error::CaptureError;
use crate::task::{DispatchPool, default_worker_count};

// ── FrameConsumer ────────────────────────────────────────────────

/// Receives every dispatched frame, on a dispatch-pool thread.
///
/// Implemented for any `Fn(CapturedFrame) + Send + Sync`, so closures,
/// channel senders wrapped in a closure, and bound methods all work.
/// A panic inside `on_frame` is caught by the pool and does not affect
/// later frames.
pub trait FrameConsumer: Send + Sync + 'static {
    fn on_frame(&self, frame: CapturedFrame);
}

impl<F> FrameConsumer for F
where
    F: Fn(CapturedFrame) + Send + Sync + 'static,
{
    fn on_frame(&self, frame: CapturedFrame) {
        self(frame)
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// What to do with cycles where the source reported no change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnchangedPolicy {
    /// Compress the all-zero delta and dispatch it as a keepalive.
    #[default]
    Dispatch,
    /// Skip compression and dispatch for the cycle.
    Suppress,
}

/// Tuning for [`CaptureSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Dispatch worker threads; 0 uses the available parallelism.
    /// With 1 worker, frames reach the consumer in capture order.
    pub workers: usize,
    /// zstd compression level.
    pub compression_level: i32,
    /// Bounded wait passed to the source; `None` uses one frame interval.
    pub acquire_timeout_ms: Option<u64>,
    /// Handling of unchanged cycles.
    pub unchanged: UnchangedPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            compression_level: DEFAULT_LEVEL,
            acquire_timeout_ms: None,
            unchanged: UnchangedPolicy::Dispatch,
        }
    }
}

impl SessionConfig {
    /// Worker count with 0 resolved to the hardware parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            default_worker_count()
        } else {
            self.workers
        }
    }

    /// Acquire timeout for `descriptor`, never below 1 ms.
    pub fn acquire_timeout(&self, descriptor: &FrameDescriptor) -> Duration {
        self.acquire_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| descriptor.frame_interval())
            .max(Duration::from_millis(1))
    }
}

// ── CaptureSession ───────────────────────────────────────────────

enum Lifecycle {
    Idle,
    Initialized(Buffers),
    Running(JoinHandle<Buffers>),
}

/// Drives one frame source through the capture-diff-compress-dispatch
/// pipeline at a fixed cadence.
///
/// # Example
///
/// ```no_run
/// use deltacap_core::{CaptureSession, CapturedFrame, DxgiSource};
///
/// # fn main() -> Result<(), deltacap_core::CaptureError> {
/// let session = CaptureSession::new(DxgiSource::new(0))?;
/// session.initialize(1920, 1080, 60)?;
/// session.start(|frame: CapturedFrame| {
///     println!("frame #{}: {} bytes", frame.frame_number, frame.data_size);
/// })?;
/// // … later …
/// session.stop();
/// # Ok(())
/// # }
/// ```
pub struct CaptureSession<S: FrameSource> {
    source: Arc<Mutex<S>>,
    lifecycle: Mutex<Lifecycle>,
    descriptor: Mutex<Option<FrameDescriptor>>,
    phase: AtomicU8,
    capturing: Arc<AtomicBool>,
    stop: Arc<StopSignal>,
    pool: Arc<DispatchPool>,
    stats: Arc<StatsCounters>,
    config: SessionConfig,
}

impl<S: FrameSource> CaptureSession<S> {
    /// Create a session with the default configuration.
    pub fn new(source: S) -> Result<Self, CaptureError> {
        Self::with_config(source, SessionConfig::default())
    }

    /// Create a session and its own dispatch pool.
    pub fn with_config(source: S, config: SessionConfig) -> Result<Self, CaptureError> {
        let pool = Arc::new(DispatchPool::new(config.resolved_workers())?);
        Ok(Self::with_pool(source, config, pool))
    }

    /// Create a session that dispatches on an existing pool.
    /// `config.workers` is ignored.
    pub fn with_pool(source: S, config: SessionConfig, pool: Arc<DispatchPool>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            lifecycle: Mutex::new(Lifecycle::Idle),
            descriptor: Mutex::new(None),
            phase: AtomicU8::new(encode_state(SessionState::Idle)),
            capturing: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(StopSignal::new()),
            pool,
            stats: Arc::new(StatsCounters::default()),
            config,
        }
    }

    /// Bring up the source and allocate zeroed frame buffers for
    /// `width × height` at `fps`.
    ///
    /// Re-initialising an initialized (not running) session releases
    /// the previous resources first. On failure the session is `Idle`.
    pub fn initialize(&self, width: u32, height: u32, fps: u32) -> Result<(), CaptureError> {
        let descriptor = FrameDescriptor::new(width, height, fps)?;
        let mut lifecycle = self.lifecycle.lock();

        match &*lifecycle {
            Lifecycle::Running(_) => return Err(CaptureError::AlreadyRunning),
            Lifecycle::Initialized(_) => {
                debug!("re-initializing; releasing previous source resources");
                self.source.lock().close();
                *lifecycle = Lifecycle::Idle;
            }
            Lifecycle::Idle => {}
        }

        self.set_phase(SessionState::Initializing);
        let opened = {
            let mut source = self.source.lock();
            source.open(&descriptor).inspect_err(|_| source.close())
        };
        if let Err(e) = opened {
            warn!(width, height, fps, "frame source failed to initialize: {e}");
            *self.descriptor.lock() = None;
            self.set_phase(SessionState::Idle);
            return Err(e.into());
        }

        *lifecycle = Lifecycle::Initialized(Buffers::new(descriptor));
        *self.descriptor.lock() = Some(descriptor);
        info!(
            width,
            height,
            fps,
            frame_bytes = descriptor.frame_size(),
            "capture session initialized"
        );
        Ok(())
    }

    /// Spawn the capture thread, delivering frames to `consumer`.
    ///
    /// Returns `Ok(())` without doing anything if the session is already
    /// capturing. Fails with [`CaptureError::NotInitialized`] before
    /// `initialize`, and with [`CaptureError::LoopTerminated`] if the
    /// previous loop ended on its own and has not been stopped.
    pub fn start<C: FrameConsumer>(&self, consumer: C) -> Result<(), CaptureError> {
        let mut lifecycle = self.lifecycle.lock();

        let buffers = match mem::replace(&mut *lifecycle, Lifecycle::Idle) {
            Lifecycle::Running(handle) => {
                *lifecycle = Lifecycle::Running(handle);
                if self.capturing.load(Ordering::SeqCst) {
                    debug!("start ignored: already capturing");
                    return Ok(());
                }
                return Err(CaptureError::LoopTerminated);
            }
            Lifecycle::Idle => return Err(CaptureError::NotInitialized),
            Lifecycle::Initialized(buffers) => buffers,
        };

        let descriptor = *buffers.descriptor();
        let capture = CaptureLoop {
            source: Arc::clone(&self.source),
            acquire_timeout: self.config.acquire_timeout(&descriptor),
            pacer: FramePacer::new(descriptor.frame_interval()),
            buffers,
            compressor: Box::new(FrameCompressor::new(self.config.compression_level)),
            unchanged: self.config.unchanged,
            consumer: Arc::new(consumer),
            pool: Arc::clone(&self.pool),
            stop: Arc::clone(&self.stop),
            capturing: Arc::clone(&self.capturing),
            stats: Arc::clone(&self.stats),
        };

        self.stop.reset();
        self.capturing.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("deltacap-capture".into())
            .spawn(move || {
                let span = info_span!(
                    "capture",
                    width = descriptor.width,
                    height = descriptor.height,
                    fps = descriptor.frame_rate
                );
                let _enter = span.enter();
                capture.run()
            });

        match spawned {
            Ok(handle) => {
                *lifecycle = Lifecycle::Running(handle);
                self.set_phase(SessionState::Running);
                info!(
                    interval_ms = descriptor.frame_interval_ms(),
                    workers = self.pool.worker_count(),
                    "capture started"
                );
                Ok(())
            }
            Err(e) => {
                error!("failed to spawn capture thread: {e}");
                self.capturing.store(false, Ordering::SeqCst);
                self.source.lock().close();
                *self.descriptor.lock() = None;
                self.set_phase(SessionState::Idle);
                Err(e.into())
            }
        }
    }

    /// Stop capturing and release the source and frame buffers.
    ///
    /// Blocks until the capture thread has exited. Idempotent, and safe
    /// to call from any thread, including while a cycle is in progress
    /// or after the loop ended on its own. Frames already queued on the
    /// dispatch pool are still delivered.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();

        match mem::replace(&mut *lifecycle, Lifecycle::Idle) {
            Lifecycle::Idle => return,
            Lifecycle::Initialized(buffers) => drop(buffers),
            Lifecycle::Running(handle) => {
                self.set_phase(SessionState::Stopping);
                self.capturing.store(false, Ordering::SeqCst);
                self.stop.trigger();
                match handle.join() {
                    Ok(buffers) => drop(buffers),
                    Err(_) => error!("capture thread panicked"),
                }
            }
        }

        self.source.lock().close();
        *self.descriptor.lock() = None;
        self.set_phase(SessionState::Idle);
        info!("capture stopped");
    }

    /// Whether the capture thread is running. Lock-free.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Current lifecycle state. A loop that ended on its own reports
    /// `Idle` even though `stop` has not been called yet.
    pub fn state(&self) -> SessionState {
        match decode_state(self.phase.load(Ordering::SeqCst)) {
            SessionState::Running if !self.is_capturing() => SessionState::Idle,
            state => state,
        }
    }

    /// Resolution and cadence, while initialized or running.
    pub fn descriptor(&self) -> Option<FrameDescriptor> {
        *self.descriptor.lock()
    }

    /// Counters accumulated over the lifetime of the session.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// The pool frames are dispatched on.
    pub fn pool(&self) -> &Arc<DispatchPool> {
        &self.pool
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn set_phase(&self, state: SessionState) {
        self.phase.store(encode_state(state), Ordering::SeqCst);
    }
}

impl<S: FrameSource> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: FrameSource> fmt::Debug for CaptureSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("state", &self.state())
            .field("descriptor", &self.descriptor())
            .field("pool", &self.pool)
            .finish()
    }
}

fn encode_state(state: SessionState) -> u8 {
    match state {
        SessionState::Idle => 0,
        SessionState::Initializing => 1,
        SessionState::Running => 2,
        SessionState::Stopping => 3,
    }
}

fn decode_state(raw: u8) -> SessionState {
    match raw {
        1 => SessionState::Initializing,
        2 => SessionState::Running,
        3 => SessionState::Stopping,
        _ => SessionState::Idle,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{ScriptedSource, Step};
    use crate::error::SourceError;

    fn session(steps: Vec<Step>) -> CaptureSession<ScriptedSource> {
        let config = SessionConfig {
            workers: 1,
            ..SessionConfig::default()
        };
        CaptureSession::with_config(ScriptedSource::new(steps), config).unwrap()
    }

    #[test]
    fn start_before_initialize_fails() {
        let s = session(vec![]);
        assert!(matches!(s.start(|_: CapturedFrame| {}), Err(CaptureError::NotInitialized)));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn failed_initialize_returns_to_idle() {
        let source =
            ScriptedSource::new([]).failing_open(SourceError::Unavailable("no adapter".into()));
        let s = CaptureSession::new(source).unwrap();
        let err = s.initialize(64, 64, 30).unwrap_err();
        assert!(matches!(err, CaptureError::Source(SourceError::Unavailable(_))));
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.descriptor().is_none());
        assert!(!s.is_capturing());
    }

    #[test]
    fn invalid_descriptor_is_rejected() {
        let s = session(vec![]);
        assert!(matches!(
            s.initialize(0, 1080, 60),
            Err(CaptureError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn lifecycle_transitions() {
        let s = session(vec![]);
        s.initialize(32, 32, 120).unwrap();
        assert_eq!(s.state(), SessionState::Initializing);
        assert_eq!(s.descriptor().map(|d| d.frame_size()), Some(32 * 32 * 4));

        s.start(|_: CapturedFrame| {}).unwrap();
        assert_eq!(s.state(), SessionState::Running);
        assert!(s.is_capturing());

        s.stop();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.is_capturing());
        assert!(s.descriptor().is_none());
    }

    #[test]
    fn initialize_while_running_is_rejected() {
        let s = session(vec![]);
        s.initialize(8, 8, 60).unwrap();
        s.start(|_: CapturedFrame| {}).unwrap();
        assert!(matches!(s.initialize(8, 8, 60), Err(CaptureError::AlreadyRunning)));
        s.stop();
        s.initialize(16, 16, 60).unwrap();
        s.stop();
    }

    #[test]
    fn reinitialize_closes_previous_resources() {
        let source = ScriptedSource::new([]);
        let probe = source.probe();
        let s = CaptureSession::new(source).unwrap();
        s.initialize(8, 8, 30).unwrap();
        s.initialize(16, 16, 30).unwrap();
        assert_eq!(probe.opens(), 2);
        assert_eq!(probe.closes(), 1);
        assert_eq!(s.descriptor().map(|d| d.width), Some(16));
        drop(s);
        assert_eq!(probe.closes(), 2);
    }

    #[test]
    fn acquire_timeout_defaults_to_frame_interval() {
        let desc = FrameDescriptor::new(8, 8, 50).unwrap();
        let mut config = SessionConfig::default();
        assert_eq!(config.acquire_timeout(&desc), Duration::from_millis(20));
        config.acquire_timeout_ms = Some(0);
        assert_eq!(config.acquire_timeout(&desc), Duration::from_millis(1));
        config.acquire_timeout_ms = Some(5);
        assert_eq!(config.acquire_timeout(&desc), Duration::from_millis(5));
    }

    #[test]
    fn config_serde_uses_defaults_for_missing_fields() {
        let cfg: SessionConfig = serde_json::from_str(r#"{"unchanged":"suppress"}"#).unwrap();
        assert_eq!(cfg.unchanged, UnchangedPolicy::Suppress);
        assert_eq!(cfg.compression_level, DEFAULT_LEVEL);
        assert_eq!(cfg.workers, 0);
        assert!(cfg.resolved_workers() >= 1);

        let text = serde_json::to_string(&SessionConfig::default()).unwrap();
        assert!(text.contains("\"dispatch\""));
    }

    #[test]
    fn state_roundtrips_through_phase_encoding() {
        for state in [
            SessionState::Idle,
            SessionState::Initializing,
            SessionState::Running,
            SessionState::Stopping,
        ] {
            assert_eq!(decode_state(encode_state(state)), state);
        }
    }
}
