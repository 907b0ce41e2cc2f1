//! # deltacap-core
//!
//! Screen-frame capture pipeline: capture, diff, compress, dispatch.
//!
//! This crate contains:
//! - **Sources**: the `FrameSource` trait, a DXGI Desktop Duplication
//!   backend, and scripted / pattern sources for tests
//! - **Pipeline**: SIMD XOR delta, zstd compression, frame pacing
//! - **Session**: `CaptureSession` owning the capture thread and its
//!   initialize / start / stop lifecycle
//! - **Task**: `DispatchPool`, the worker pool that runs frame consumers
//! - **Consumers**: `FrameDecoder` and `ThroughputMeter`
//! - **Error**: `CaptureError` / `SourceError`, `thiserror`-based

pub mod capture;
pub mod error;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    Acquired, CaptureSession, CapturedFrame, DxgiSource, FrameBuffer, FrameCompressor,
    FrameConsumer, FrameDecoder, FrameDescriptor, FrameSource, PatternSource, ScriptedSource,
    SessionConfig, SessionState, SessionStats, SourceProbe, Step, ThroughputMeter,
    UnchangedPolicy, epoch_millis,
};
pub use error::{CaptureError, SourceError};
pub use task::{DispatchPool, Task, default_worker_count};
