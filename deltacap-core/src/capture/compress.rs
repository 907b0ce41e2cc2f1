//! Stateless zstd compression of delta buffers.
//!
//! Each call compresses with a fresh context: no dictionary or history
//! survives between frames, so any thread may compress or decompress
//! without coordination.

use crate::error::CaptureError;

/// zstd level used when none is configured. Level 1 keeps a 1080p delta
/// well inside a 60 fps frame budget.
pub const DEFAULT_LEVEL: i32 = 1;

/// Worst-case compressed size for `input_len` bytes.
pub fn compress_bound(input_len: usize) -> usize {
    zstd::zstd_safe::compress_bound(input_len)
}

/// zstd compressor with a fixed level.
#[derive(Debug, Clone, Copy)]
pub struct FrameCompressor {
    level: i32,
}

impl FrameCompressor {
    /// Create a compressor; `level` is clamped to zstd's supported range.
    pub fn new(level: i32) -> Self {
        let range = zstd::compression_level_range();
        Self {
            level: level.clamp(*range.start(), *range.end()),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Compress `input` into `output` and return the compressed length.
    ///
    /// `output` is resized to [`compress_bound`] of the input before
    /// compressing and truncated to the compressed length afterwards, so
    /// a scratch `Vec` can be reused across frames without reallocating.
    pub fn compress(&self, input: &[u8], output: &mut Vec<u8>) -> Result<usize, CaptureError> {
        output.clear();
        output.resize(compress_bound(input.len()), 0);

        let written = zstd::bulk::compress_to_buffer(input, output.as_mut_slice(), self.level)
            .map_err(|e| CaptureError::Compression(e.to_string()))?;
        if written == 0 {
            return Err(CaptureError::Compression("compressor produced no output".into()));
        }

        output.truncate(written);
        Ok(written)
    }
}

/// Delta compression as driven by the capture loop.
pub(crate) trait Compress: Send {
    fn compress(&self, input: &[u8], output: &mut Vec<u8>) -> Result<usize, CaptureError>;
}

impl Compress for FrameCompressor {
    fn compress(&self, input: &[u8], output: &mut Vec<u8>) -> Result<usize, CaptureError> {
        FrameCompressor::compress(self, input, output)
    }
}

impl Default for FrameCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

/// Decompress a payload produced by [`FrameCompressor::compress`].
///
/// `expected_len` is the uncompressed size; a payload that inflates to
/// any other length is rejected.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CaptureError> {
    let out = zstd::bulk::decompress(data, expected_len)
        .map_err(|e| CaptureError::Decompression(e.to_string()))?;
    if out.len() != expected_len {
        return Err(CaptureError::BufferSize {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_buffer_compresses_far_below_input() {
        let input = vec![0u8; 1920 * 1080 * 4];
        let mut out = Vec::new();
        let n = FrameCompressor::default().compress(&input, &mut out).unwrap();
        assert_eq!(n, out.len());
        assert!(n < input.len() / 1000, "compressed to {n} bytes");
    }

    #[test]
    fn small_zero_buffers_still_shrink() {
        let mut out = Vec::new();
        for len in [256usize, 1024, 4096] {
            let n = FrameCompressor::default()
                .compress(&vec![0u8; len], &mut out)
                .unwrap();
            assert!(n < len, "{len} -> {n}");
        }
    }

    #[test]
    fn output_buffer_is_reusable() {
        let compressor = FrameCompressor::default();
        let mut out = Vec::new();
        let a = compressor.compress(&[7u8; 4096], &mut out).unwrap();
        let first = out.clone();
        let _ = compressor.compress(&[1, 2, 3, 4, 5], &mut out).unwrap();
        let b = compressor.compress(&[7u8; 4096], &mut out).unwrap();
        assert_eq!(a, b);
        assert_eq!(first, out);
    }

    #[test]
    fn level_is_clamped() {
        let c = FrameCompressor::new(10_000);
        assert_eq!(c.level(), *zstd::compression_level_range().end());
    }

    #[test]
    fn decompress_rejects_wrong_length() {
        let mut out = Vec::new();
        FrameCompressor::default().compress(&[0u8; 64], &mut out).unwrap();
        assert!(decompress(&out, 64).is_ok());
        assert!(decompress(&out, 32).is_err());
        assert!(decompress(b"not zstd", 64).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn roundtrip_random_bytes(input in prop::collection::vec(any::<u8>(), 1..8192)) {
            let mut out = Vec::new();
            let n = FrameCompressor::default().compress(&input, &mut out).unwrap();
            prop_assert!(n <= compress_bound(input.len()));
            let restored = decompress(&out, input.len()).unwrap();
            prop_assert_eq!(restored, input);
        }
    }
}
