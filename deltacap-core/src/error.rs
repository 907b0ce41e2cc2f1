//! Domain-specific error types for the capture pipeline.
//!
//! All fallible operations return `Result<T, CaptureError>`.
//! Frame-source failures carry their own [`SourceError`] so the capture
//! loop can tell a lost desktop apart from a one-off copy failure.

use thiserror::Error;

/// The canonical error type for the capture pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    // ── Session Errors ───────────────────────────────────────────
    /// Width, height or frame rate was zero (or the frame size overflowed).
    #[error("invalid frame descriptor: {0}")]
    InvalidDescriptor(&'static str),

    /// `start` was called before a successful `initialize`.
    #[error("session is not initialized")]
    NotInitialized,

    /// `initialize` was called while the capture thread is running.
    #[error("session is already running; stop it first")]
    AlreadyRunning,

    /// The capture loop ended on its own (access lost); `stop` must be
    /// called before the session can be reused.
    #[error("capture loop terminated; stop the session before restarting")]
    LoopTerminated,

    // ── Frame Source Errors ──────────────────────────────────────
    /// The frame source reported a failure.
    #[error("frame source error: {0}")]
    Source(#[from] SourceError),

    // ── Codec Errors ─────────────────────────────────────────────
    /// Compression produced no output or failed outright.
    #[error("compression failed: {0}")]
    Compression(String),

    /// A payload could not be decompressed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// A buffer did not have the size the frame descriptor requires.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    /// A frame arrived with an unexpected sequence number.
    #[error("frame out of order: expected #{expected}, got #{actual}")]
    OutOfOrder { expected: u64, actual: u64 },

    // ── Dispatch Errors ──────────────────────────────────────────
    /// The dispatch pool has shut down and no longer accepts tasks.
    #[error("dispatch pool is closed")]
    PoolClosed,

    /// An OS thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ── SourceError ──────────────────────────────────────────────────

/// Failure reported by a [`FrameSource`](crate::capture::FrameSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The duplication session was invalidated (desktop switch, mode
    /// change, secure desktop). Requires full reinitialisation.
    #[error("access to the frame source was lost")]
    AccessLost,

    /// The source could not be brought up on this machine.
    #[error("frame source unavailable: {0}")]
    Unavailable(String),

    /// Any other failure from the underlying API.
    #[error("{0}")]
    Failed(String),
}

impl SourceError {
    /// Whether this error ends the capture loop when it is raised while
    /// copying a frame. Acquisition errors are always fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::AccessLost | SourceError::Unavailable(_))
    }
}

// ── Tests ────────────────────────────────────────────────────────
