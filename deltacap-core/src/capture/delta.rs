//! Byte-wise XOR delta between consecutive frames.
//!
//! `delta[i] = current[i] ^ previous[i]`. Unchanged regions become runs
//! of zero bytes, which the compressor collapses to almost nothing, and
//! applying the same operation to `(delta, previous)` yields `current`
//! again.
//!
//! The wide path processes [`CHUNK_WIDTH`] bytes per step with SSE2
//! (x86_64) or NEON (aarch64); the remaining `len % CHUNK_WIDTH` bytes go
//! through the scalar loop. Both paths produce identical output.

use crate::error::CaptureError;

/// Bytes processed per vector step.
pub const CHUNK_WIDTH: usize = 16;

/// Compute `out = current ^ previous`.
///
/// All three slices must have the same length.
pub fn xor_delta(current: &[u8], previous: &[u8], out: &mut [u8]) -> Result<(), CaptureError> {
    check_len(current.len(), previous.len())?;
    check_len(current.len(), out.len())?;

    let wide = current.len() - current.len() % CHUNK_WIDTH;
    xor_wide(&current[..wide], &previous[..wide], &mut out[..wide]);
    xor_scalar(&current[wide..], &previous[wide..], &mut out[wide..]);
    Ok(())
}

/// Scalar reference implementation, exposed for verification and benches.
pub fn xor_delta_scalar(
    current: &[u8],
    previous: &[u8],
    out: &mut [u8],
) -> Result<(), CaptureError> {
    check_len(current.len(), previous.len())?;
    check_len(current.len(), out.len())?;
    xor_scalar(current, previous, out);
    Ok(())
}

/// Whether a delta contains no changed bytes.
pub fn is_unchanged(delta: &[u8]) -> bool {
    delta.iter().all(|&b| b == 0)
}

fn check_len(expected: usize, actual: usize) -> Result<(), CaptureError> {
    if expected != actual {
        return Err(CaptureError::BufferSize { expected, actual });
    }
    Ok(())
}

fn xor_scalar(current: &[u8], previous: &[u8], out: &mut [u8]) {
    for ((o, c), p) in out.iter_mut().zip(current).zip(previous) {
        *o = c ^ p;
    }
}

// ── Vector paths ─────────────────────────────────────────────────
// Callers pass slices whose length is a multiple of CHUNK_WIDTH.

#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
fn xor_wide(current: &[u8], previous: &[u8], out: &mut [u8]) {
    use std::arch::x86_64::*;

    debug_assert_eq!(current.len() % CHUNK_WIDTH, 0);
    let chunks = current.len() / CHUNK_WIDTH;

    unsafe {
        for i in 0..chunks {
            let offset = i * CHUNK_WIDTH;
            let c = _mm_loadu_si128(current.as_ptr().add(offset) as *const __m128i);
            let p = _mm_loadu_si128(previous.as_ptr().add(offset) as *const __m128i);
            _mm_storeu_si128(
                out.as_mut_ptr().add(offset) as *mut __m128i,
                _mm_xor_si128(c, p),
            );
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_feature = "neon"))]
fn xor_wide(current: &[u8], previous: &[u8], out: &mut [u8]) {
    use std::arch::aarch64::*;

    debug_assert_eq!(current.len() % CHUNK_WIDTH, 0);
    let chunks = current.len() / CHUNK_WIDTH;

    unsafe {
        for i in 0..chunks {
            let offset = i * CHUNK_WIDTH;
            let c = vld1q_u8(current.as_ptr().add(offset));
            let p = vld1q_u8(previous.as_ptr().add(offset));
            vst1q_u8(out.as_mut_ptr().add(offset), veorq_u8(c, p));
        }
    }
}

#[cfg(not(any(
    all(target_arch = "x86_64", target_feature = "sse2"),
    all(target_arch = "aarch64", target_feature = "neon")
)))]
fn xor_wide(current: &[u8], previous: &[u8], out: &mut [u8]) {
    // Portable fallback: 16 bytes as two u64 words.
    for ((o, c), p) in out
        .chunks_exact_mut(CHUNK_WIDTH)
        .zip(current.chunks_exact(CHUNK_WIDTH))
        .zip(previous.chunks_exact(CHUNK_WIDTH))
    {
        for w in 0..2 {
            let r = w * 8..w * 8 + 8;
            let a = u64::from_ne_bytes(c[r.clone()].try_into().unwrap_or([0; 8]));
            let b = u64::from_ne_bytes(p[r.clone()].try_into().unwrap_or([0; 8]));
            o[r].copy_from_slice(&(a ^ b).to_ne_bytes());
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    #[test]
    fn identical_buffers_give_zero_delta() {
        let frame = pattern(64 * 64 * 4, 7);
        let mut out = vec![0xFFu8; frame.len()];
        xor_delta(&frame, &frame, &mut out).unwrap();
        assert!(is_unchanged(&out));
    }

    #[test]
    fn single_pixel_change_is_isolated() {
        let previous = pattern(64 * 64 * 4, 1);
        let mut current = previous.clone();
        let pixel = (10 * 64 + 20) * 4;
        current[pixel..pixel + 4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut out = vec![0u8; current.len()];
        xor_delta(&current, &previous, &mut out).unwrap();

        for (i, &b) in out.iter().enumerate() {
            if (pixel..pixel + 4).contains(&i) {
                assert_eq!(b, current[i] ^ previous[i]);
            } else {
                assert_eq!(b, 0, "unexpected change at byte {i}");
            }
        }
    }

    #[test]
    fn tail_shorter_than_chunk_is_handled() {
        for len in [0, 1, 15, 16, 17, 31, 33, 100] {
            let a = pattern(len, 3);
            let b = pattern(len, 200);
            let mut wide = vec![0u8; len];
            let mut scalar = vec![0u8; len];
            xor_delta(&a, &b, &mut wide).unwrap();
            xor_delta_scalar(&a, &b, &mut scalar).unwrap();
            assert_eq!(wide, scalar, "len {len}");
        }
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut out = vec![0u8; 8];
        let err = xor_delta(&[0u8; 8], &[0u8; 4], &mut out).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::BufferSize {
                expected: 8,
                actual: 4
            }
        ));
        assert!(xor_delta(&[0u8; 8], &[0u8; 8], &mut [0u8; 7]).is_err());
    }

    proptest! {
        #[test]
        fn delta_is_self_inverse(
            (current, previous) in (0usize..600).prop_flat_map(|n| (
                prop::collection::vec(any::<u8>(), n),
                prop::collection::vec(any::<u8>(), n),
            ))
        ) {
            let mut delta = vec![0u8; current.len()];
            xor_delta(&current, &previous, &mut delta).unwrap();

            let mut restored = vec![0u8; current.len()];
            xor_delta(&delta, &previous, &mut restored).unwrap();
            prop_assert_eq!(restored, current);
        }

        #[test]
        fn wide_matches_scalar(
            (a, b) in (0usize..600).prop_flat_map(|n| (
                prop::collection::vec(any::<u8>(), n),
                prop::collection::vec(any::<u8>(), n),
            ))
        ) {
            let mut wide = vec![0u8; a.len()];
            let mut scalar = vec![0u8; a.len()];
            xor_delta(&a, &b, &mut wide).unwrap();
            xor_delta_scalar(&a, &b, &mut scalar).unwrap();
            prop_assert_eq!(wide, scalar);
        }
    }
}
