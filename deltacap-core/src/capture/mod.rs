//! # Capture pipeline
//!
//! Acquire desktop frames, XOR them against the previous frame, compress
//! the delta with zstd, and hand each result to a consumer on a worker
//! pool, paced to a target frame rate.
//!
//! ## Architecture
//!
//! ```text
//! CAPTURE THREAD (one per session)              DISPATCH POOL
//! ┌──────────────────────────────┐             ┌────────────────────┐
//! │ FrameSource::acquire_next    │             │ worker 0..N        │
//! │   ↓                          │             │   ↓                │
//! │ copy_to_system_memory        │  enqueue    │ FrameConsumer      │
//! │   ↓                          │ ──────────► │   ::on_frame       │
//! │ xor_delta(current, previous) │             │   ↓                │
//! │   ↓                          │             │ FrameDecoder /     │
//! │ FrameCompressor::compress    │             │ ThroughputMeter    │
//! │   ↓                          │             └────────────────────┘
//! │ FramePacer::pace             │
//! └──────────────────────────────┘
//! ```
//!
//! ## Sub-modules
//!
//! | Module       | Purpose                                             |
//! |------------- |-----------------------------------------------------|
//! | `types`      | Frame descriptor, buffers, captured frame, state    |
//! | `source`     | `FrameSource` trait implemented by every backend    |
//! | `dxgi`       | DXGI Desktop Duplication source (Windows)           |
//! | `synthetic`  | Scripted and pattern sources for tests and demos    |
//! | `delta`      | SIMD XOR delta between consecutive frames           |
//! | `compress`   | zstd compression of deltas                          |
//! | `pacing`     | Frame-rate pacing with prompt stop                  |
//! | `pipeline`   | One capture cycle and the loop around it            |
//! | `session`    | Session lifecycle: initialize / start / stop        |
//! | `decoder`    | Consumer-side frame reconstruction                  |
//! | `throughput` | Rolling bytes/sec and frames/sec meter              |

pub mod compress;
pub mod decoder;
pub mod delta;
pub mod dxgi;
pub mod pacing;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod synthetic;
pub mod throughput;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use compress::FrameCompressor;
pub use decoder::FrameDecoder;
pub use delta::{is_unchanged, xor_delta};
pub use dxgi::{DxgiFrame, DxgiSource};
pub use pacing::{FramePacer, StopSignal};
pub use pipeline::{Buffers, SessionStats};
pub use session::{CaptureSession, FrameConsumer, SessionConfig, UnchangedPolicy};
pub use source::{Acquired, FrameSource};
pub use synthetic::{PatternSource, ScriptedSource, SourceProbe, Step};
pub use throughput::ThroughputMeter;
pub use types::{
    BYTES_PER_PIXEL, CapturedFrame, FrameBuffer, FrameDescriptor, SessionState, epoch_millis,
};
