//! Shared types for the capture pipeline.
//!
//! [`FrameBuffer`] is the capture thread's private pixel storage;
//! [`CapturedFrame`] is the owned value handed across threads to the
//! consumer. Nothing that borrows a `FrameBuffer` ever leaves the
//! capture thread.

use std::ops::{Deref, DerefMut};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::CaptureError;

/// Bytes per pixel of every buffer in the pipeline (BGRA8).
pub const BYTES_PER_PIXEL: usize = 4;

// ── FrameDescriptor ──────────────────────────────────────────────

/// Resolution and cadence of a session. Fixed at `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub frame_rate: u32,
    frame_size: usize,
    frame_interval: Duration,
}

impl FrameDescriptor {
    /// Validate the configuration and derive frame size and interval.
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidDescriptor("width and height must be > 0"));
        }
        if frame_rate == 0 {
            return Err(CaptureError::InvalidDescriptor("frame rate must be > 0"));
        }
        let frame_size = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
            .ok_or(CaptureError::InvalidDescriptor("frame size overflows usize"))?;

        Ok(Self {
            width,
            height,
            frame_rate,
            frame_size,
            frame_interval: Duration::from_secs_f64(1.0 / frame_rate as f64),
        })
    }

    /// `width * height * 4`.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Time budget per cycle.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Frame interval in (fractional) milliseconds.
    pub fn frame_interval_ms(&self) -> f64 {
        self.frame_interval.as_secs_f64() * 1000.0
    }

    /// Bytes per row of a tightly packed frame.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }
}

// ── FrameBuffer ──────────────────────────────────────────────────

/// Fixed-capacity, zero-initialised BGRA pixel buffer.
///
/// The length never changes after construction; a session that needs a
/// different resolution allocates new buffers at `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Box<[u8]>,
}

impl FrameBuffer {
    /// Allocate a zero-filled buffer sized for `descriptor`.
    pub fn new(descriptor: &FrameDescriptor) -> Self {
        Self {
            data: vec![0u8; descriptor.frame_size()].into_boxed_slice(),
        }
    }

    /// Overwrite this buffer with the contents of `other`.
    ///
    /// # Panics
    ///
    /// Panics if the two buffers differ in length.
    pub fn copy_from(&mut self, other: &FrameBuffer) {
        self.data.copy_from_slice(&other.data);
    }

}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for FrameBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

// ── CapturedFrame ────────────────────────────────────────────────

/// One compressed frame handed to the consumer.
///
/// `data` is an owned copy of the compressor output; it never aliases
/// the session's frame buffers.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Sequence number within the current `start`, starting at 0.
    pub frame_number: u64,
    /// zstd-compressed XOR delta against the previous frame.
    pub data: Bytes,
    /// Length of `data` in bytes.
    pub data_size: usize,
    /// Length of the delta before compression (`width * height * 4`).
    pub uncompressed_size: usize,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Configured frame rate of the session.
    pub frame_rate: u32,
    /// Wall-clock time the cycle started, in epoch milliseconds.
    pub timestamp_ms: u64,
    /// The source reported no change for this cycle (keepalive frame).
    pub unchanged: bool,
}

impl CapturedFrame {
    /// Compressed size as a fraction of the raw frame size.
    pub fn compression_ratio(&self) -> f64 {
        if self.uncompressed_size == 0 {
            return 0.0;
        }
        self.data_size as f64 / self.uncompressed_size as f64
    }
}

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle of a capture session.
///
/// ```text
/// Idle ──initialize──► Initializing ──start──► Running ──stop──► Stopping ──► Idle
///                                              │
///                                              └─ access lost ──► Idle (stop still required)
/// ```
///
/// `Initializing` covers the window between a successful `initialize`
/// and the `start` that spawns the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Initializing,
    Running,
    Stopping,
}

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ────────────────────────────────────────────────────────
