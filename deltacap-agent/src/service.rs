//! Agent service core logic.
//!
//! Runs one capture session until stopped, feeds every dispatched frame
//! into a throughput meter, logs throughput once per second, and
//! re-initializes the session when the capture loop ends on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use deltacap_core::{
    CaptureError, CaptureSession, CapturedFrame, FrameSource, SessionStats, ThroughputMeter,
};

use crate::config::AgentConfig;

/// How often the run loop checks the session and the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How often throughput is logged.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Totals returned when the service stops.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentReport {
    /// Session counters at shutdown.
    pub stats: SessionStats,
    /// Successful re-initializations after the loop ended itself.
    pub restarts: u64,
}

// ── AgentService ─────────────────────────────────────────────────

/// The top-level capture agent.
pub struct AgentService {
    config: AgentConfig,
    /// Set once by `stop` or a stop handle; `run` never clears it.
    stop_requested: Arc<AtomicBool>,
    running: AtomicBool,
    restarts: AtomicU64,
    meter: Arc<Mutex<ThroughputMeter>>,
}

impl AgentService {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            meter: Arc::new(Mutex::new(ThroughputMeter::new())),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task (Ctrl-C, a duration timer). Storing `true` requests
    /// a stop, including before `run` has been called.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    /// Capture from `source` until stopped.
    ///
    /// 1. Creates the session and initializes it at the configured size.
    /// 2. Starts it with a consumer that records into the meter.
    /// 3. Polls until a stop is requested or the loop ends itself.
    /// 4. On a self-ended loop, stops the session and, if recovery is
    ///    enabled, re-initializes after `retry_delay_ms` and starts again.
    ///
    /// Returns without capturing if a stop was requested beforehand.
    /// Fails only if the session cannot be created, the first
    /// `initialize` fails, or the capture thread cannot be spawned.
    pub async fn run<S: FrameSource>(&self, source: S) -> Result<AgentReport, CaptureError> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.capture(source).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Request a stop.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Whether `run` is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Shared throughput meter fed by the frame consumer.
    pub fn meter(&self) -> &Arc<Mutex<ThroughputMeter>> {
        &self.meter
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn capture<S: FrameSource>(&self, source: S) -> Result<AgentReport, CaptureError> {
        let cap = &self.config.capture;
        let session = CaptureSession::with_config(source, self.config.session.clone())?;
        session.initialize(cap.width, cap.height, cap.fps)?;

        'sessions: while !self.is_stop_requested() {
            session.start(self.consumer())?;
            self.watch(&session).await;

            if self.is_stop_requested() {
                break;
            }

            warn!("capture loop ended on its own");
            session.stop();
            if !self.config.recovery.reinitialize_on_access_lost {
                break;
            }

            // Retry until initialize succeeds or we are told to stop.
            let delay = Duration::from_millis(self.config.recovery.retry_delay_ms);
            loop {
                tokio::time::sleep(delay).await;
                if self.is_stop_requested() {
                    break 'sessions;
                }
                match session.initialize(cap.width, cap.height, cap.fps) {
                    Ok(()) => {
                        let n = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
                        info!(restarts = n, "capture session re-initialized");
                        break;
                    }
                    Err(e) => warn!("re-initialize failed: {e}; retrying"),
                }
            }
        }

        session.stop();

        let report = AgentReport {
            stats: session.stats(),
            restarts: self.restarts(),
        };
        info!(
            dispatched = report.stats.frames_dispatched,
            bytes = report.stats.bytes_compressed,
            restarts = report.restarts,
            "agent stopped"
        );
        Ok(report)
    }

    /// Consumer closure that records each frame into the meter.
    fn consumer(&self) -> impl Fn(CapturedFrame) + Send + Sync + 'static {
        let meter = Arc::clone(&self.meter);
        move |frame: CapturedFrame| meter.lock().record_frame(&frame)
    }

    /// Poll until a stop is requested or the session stops capturing,
    /// logging throughput every [`REPORT_INTERVAL`].
    async fn watch<S: FrameSource>(&self, session: &CaptureSession<S>) {
        let mut since_report = Duration::ZERO;
        while !self.is_stop_requested() && session.is_capturing() {
            tokio::time::sleep(POLL_INTERVAL).await;
            since_report += POLL_INTERVAL;
            if since_report >= REPORT_INTERVAL {
                since_report = Duration::ZERO;
                self.report();
            }
        }
    }

    fn report(&self) {
        let meter = self.meter.lock();
        let latency_ms = meter.latency().map_or(0.0, |d| d.as_secs_f64() * 1000.0);
        info!(
            fps = meter.frames_per_sec(),
            changed_fps = meter.changed_frames_per_sec(),
            keepalives = meter.keepalive_count(),
            kbps = meter.bytes_per_sec() / 1024,
            ratio = meter.compression_ratio(),
            latency_ms,
            "throughput"
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────
