//! The Frame Source capability consumed by the capture loop.
//!
//! A source hands out opaque frame handles from a bounded wait and copies
//! a handle's pixels into system memory on request. How the pixels are
//! produced (Desktop Duplication, a windowed capture session, a test
//! script) is up to the implementation.

use std::time::Duration;

use crate::capture::types::FrameDescriptor;
use crate::error::SourceError;

/// Outcome of a successful [`FrameSource::acquire_next`].
#[derive(Debug)]
pub enum Acquired<F> {
    /// A new frame is available; pass the handle to
    /// [`FrameSource::copy_to_system_memory`].
    Changed(F),
    /// Nothing changed within the timeout.
    Unchanged,
}

impl<F> Acquired<F> {
    pub fn is_changed(&self) -> bool {
        matches!(self, Acquired::Changed(_))
    }
}

/// A provider of raw BGRA screen frames.
///
/// Exactly one capture session drives a source. The session calls
/// [`open`](Self::open) during `initialize`, then alternates
/// `acquire_next` / `copy_to_system_memory` on its capture thread, and
/// calls [`close`](Self::close) from `stop` once that thread has exited.
///
/// Any `Err` from `acquire_next` ends the capture loop. An `Err` from
/// `copy_to_system_memory` only ends it when
/// [`SourceError::is_fatal`] is true; otherwise the cycle is skipped.
pub trait FrameSource: Send + 'static {
    /// Handle to an acquired, not yet copied frame.
    ///
    /// Implementations must tolerate a handle being dropped without a
    /// copy and release the underlying frame before the next acquire.
    type Frame: Send;

    /// Stand up device/session resources for `descriptor`.
    fn open(&mut self, descriptor: &FrameDescriptor) -> Result<(), SourceError>;

    /// Wait at most `timeout` for the next frame.
    fn acquire_next(&mut self, timeout: Duration) -> Result<Acquired<Self::Frame>, SourceError>;

    /// Copy `frame` into `dest` as tightly packed rows of
    /// `width * 4` bytes, releasing the frame whether or not the copy
    /// succeeds.
    fn copy_to_system_memory(
        &mut self,
        frame: Self::Frame,
        dest: &mut [u8],
    ) -> Result<(), SourceError>;

    /// Release everything acquired by `open`. Must be idempotent.
    fn close(&mut self);
}
