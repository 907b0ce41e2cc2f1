//! Consumer-side frame reconstruction.
//!
//! Reverses the pipeline for one stream: decompress the payload back into
//! its XOR delta, then XOR it onto the last reconstructed frame. Starting
//! from a zero frame, applying every dispatched frame in `frame_number`
//! order reproduces the producer's buffer exactly.

use crate::capture::compress::decompress;
use crate::capture::delta::xor_delta;
use crate::capture::types::CapturedFrame;
use crate::error::CaptureError;

/// Stateful decoder holding the most recent reconstructed frame.
pub struct FrameDecoder {
    /// Persistent frame buffer, updated in place.
    frame_buffer: Vec<u8>,
    /// Dimensions of the current frame buffer.
    buf_width: u32,
    buf_height: u32,
    /// Frame number the next `apply` expects.
    next_frame: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            frame_buffer: Vec::new(),
            buf_width: 0,
            buf_height: 0,
            next_frame: 0,
        }
    }

    /// Decompress a frame's payload into its raw XOR delta.
    pub fn decode(frame: &CapturedFrame) -> Result<Vec<u8>, CaptureError> {
        decompress(&frame.data, frame.uncompressed_size)
    }

    /// Apply `frame` and return the reconstructed image.
    ///
    /// Frames must arrive in sequence. A resolution change resets the
    /// buffer to zero, as the producer does on `initialize`.
    pub fn apply(&mut self, frame: &CapturedFrame) -> Result<&[u8], CaptureError> {
        if frame.width != self.buf_width || frame.height != self.buf_height {
            self.frame_buffer = vec![0u8; frame.uncompressed_size];
            self.buf_width = frame.width;
            self.buf_height = frame.height;
            self.next_frame = 0;
        }
        if frame.frame_number != self.next_frame {
            return Err(CaptureError::OutOfOrder {
                expected: self.next_frame,
                actual: frame.frame_number,
            });
        }

        let delta = Self::decode(frame)?;
        let mut current = vec![0u8; self.frame_buffer.len()];
        xor_delta(&delta, &self.frame_buffer, &mut current)?;
        self.frame_buffer = current;

        self.next_frame += 1;
        Ok(&self.frame_buffer)
    }

    /// Forget the reconstructed frame; the next frame must be #0.
    pub fn reset(&mut self) {
        self.frame_buffer.fill(0);
        self.next_frame = 0;
    }

    /// Current frame buffer contents (empty before the first frame).
    pub fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::compress::FrameCompressor;
    use bytes::Bytes;

    /// Encode `current` against `previous` the way the capture loop does.
    fn encode(number: u64, w: u32, h: u32, current: &[u8], previous: &[u8]) -> CapturedFrame {
        let mut delta = vec![0u8; current.len()];
        xor_delta(current, previous, &mut delta).unwrap();
        let mut out = Vec::new();
        let n = FrameCompressor::default().compress(&delta, &mut out).unwrap();
        CapturedFrame {
            frame_number: number,
            data: Bytes::from(out),
            data_size: n,
            uncompressed_size: delta.len(),
            width: w,
            height: h,
            frame_rate: 30,
            timestamp_ms: 0,
            unchanged: current == previous,
        }
    }

    #[test]
    fn sequence_reconstructs_every_frame() {
        let zero = vec![0u8; 8 * 8 * 4];
        let a = vec![0x11u8; zero.len()];
        let mut b = a.clone();
        b[40..44].copy_from_slice(&[1, 2, 3, 4]);

        let mut dec = FrameDecoder::new();
        assert_eq!(dec.apply(&encode(0, 8, 8, &a, &zero)).unwrap(), &a[..]);
        assert_eq!(dec.apply(&encode(1, 8, 8, &b, &a)).unwrap(), &b[..]);
        assert_eq!(dec.apply(&encode(2, 8, 8, &b, &b)).unwrap(), &b[..]);
        assert_eq!(dec.next_frame(), 3);
    }

    #[test]
    fn gap_is_reported_and_state_kept() {
        let zero = vec![0u8; 4 * 4 * 4];
        let a = vec![0x22u8; zero.len()];

        let mut dec = FrameDecoder::new();
        dec.apply(&encode(0, 4, 4, &a, &zero)).unwrap();
        let err = dec.apply(&encode(2, 4, 4, &a, &a)).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::OutOfOrder {
                expected: 1,
                actual: 2
            }
        ));
        assert_eq!(dec.frame_buffer(), &a[..]);
    }

    #[test]
    fn resolution_change_restarts_the_stream() {
        let mut dec = FrameDecoder::new();
        let small = vec![7u8; 2 * 2 * 4];
        dec.apply(&encode(0, 2, 2, &small, &[0u8; 16])).unwrap();

        let big = vec![9u8; 4 * 4 * 4];
        let out = dec.apply(&encode(0, 4, 4, &big, &[0u8; 64])).unwrap();
        assert_eq!(out, &big[..]);
    }

    #[test]
    fn reset_expects_frame_zero() {
        let zero = vec![0u8; 16];
        let a = vec![1u8; 16];
        let mut dec = FrameDecoder::new();
        dec.apply(&encode(0, 2, 2, &a, &zero)).unwrap();
        dec.reset();
        assert_eq!(dec.next_frame(), 0);
        assert!(dec.frame_buffer().iter().all(|&b| b == 0));
        assert_eq!(dec.apply(&encode(0, 2, 2, &a, &zero)).unwrap(), &a[..]);
    }
}
