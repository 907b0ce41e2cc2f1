//! Consumer-side meter for dispatched frames.
//!
//! Keeps the frames delivered in the last `window` and derives payload
//! bytes/second, frames/second (split into changed frames and unchanged
//! keepalives), the window's compression ratio, and a smoothed
//! capture-to-delivery latency taken from each frame's `timestamp_ms`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::capture::types::{CapturedFrame, epoch_millis};

/// Weight of a new latency sample in the moving average.
const LATENCY_ALPHA: f64 = 0.125;

#[derive(Debug, Clone, Copy)]
struct Delivery {
    at: Instant,
    payload: u64,
    raw: u64,
    keepalive: bool,
}

/// Rolling-window view of a frame stream.
#[derive(Debug)]
pub struct ThroughputMeter {
    window: Duration,
    deliveries: VecDeque<Delivery>,
    payload_bytes: u64,
    raw_bytes: u64,
    keepalives: usize,
    /// `None` until the first frame arrives.
    latency_ms: Option<f64>,
}

impl ThroughputMeter {
    /// Meter over the last second.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            deliveries: VecDeque::new(),
            payload_bytes: 0,
            raw_bytes: 0,
            keepalives: 0,
            latency_ms: None,
        }
    }

    /// Account for `frame` as delivered now.
    pub fn record_frame(&mut self, frame: &CapturedFrame) {
        self.record_frame_at(frame, Instant::now(), epoch_millis());
    }

    /// Account for `frame` as delivered at `at`, with the wall clock
    /// reading `now_ms`.
    pub fn record_frame_at(&mut self, frame: &CapturedFrame, at: Instant, now_ms: u64) {
        let delivery = Delivery {
            at,
            payload: frame.data_size as u64,
            raw: frame.uncompressed_size as u64,
            keepalive: frame.unchanged,
        };
        self.payload_bytes += delivery.payload;
        self.raw_bytes += delivery.raw;
        self.keepalives += usize::from(delivery.keepalive);
        self.deliveries.push_back(delivery);
        self.expire(at);

        let sample = now_ms.saturating_sub(frame.timestamp_ms) as f64;
        self.latency_ms = Some(match self.latency_ms {
            None => sample,
            Some(avg) => avg + LATENCY_ALPHA * (sample - avg),
        });
    }

    /// Payload bytes per second; 0 with fewer than two frames.
    pub fn bytes_per_sec(&self) -> u64 {
        match self.span() {
            Some(secs) => (self.payload_bytes as f64 / secs) as u64,
            None => 0,
        }
    }

    /// All delivered frames per second, keepalives included.
    pub fn frames_per_sec(&self) -> f64 {
        self.rate(self.deliveries.len())
    }

    /// Frames per second that carried a screen change.
    pub fn changed_frames_per_sec(&self) -> f64 {
        self.rate(self.deliveries.len() - self.keepalives)
    }

    /// Keepalive (unchanged) frames currently in the window.
    pub fn keepalive_count(&self) -> usize {
        self.keepalives
    }

    /// Compressed size over raw size for the frames in the window.
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            return 0.0;
        }
        self.payload_bytes as f64 / self.raw_bytes as f64
    }

    /// Smoothed capture-to-delivery latency, `None` before any frame.
    pub fn latency(&self) -> Option<Duration> {
        self.latency_ms
            .map(|ms| Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }

    /// Frames currently in the window.
    pub fn sample_count(&self) -> usize {
        self.deliveries.len()
    }

    /// Seconds between the oldest and newest delivery, if there are at
    /// least two distinct instants.
    fn span(&self) -> Option<f64> {
        let (first, last) = (self.deliveries.front()?, self.deliveries.back()?);
        let secs = last.at.duration_since(first.at).as_secs_f64();
        (self.deliveries.len() >= 2 && secs > 0.0).then_some(secs)
    }

    /// Intervals per second: `count` frames span `count - 1` gaps.
    fn rate(&self, count: usize) -> f64 {
        match self.span() {
            Some(secs) => count.saturating_sub(1) as f64 / secs,
            None => 0.0,
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.deliveries.front().copied() {
            if now.duration_since(oldest.at) <= self.window {
                break;
            }
            self.deliveries.pop_front();
            self.payload_bytes -= oldest.payload;
            self.raw_bytes -= oldest.raw;
            self.keepalives -= usize::from(oldest.keepalive);
        }
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(data_size: usize, timestamp_ms: u64, unchanged: bool) -> CapturedFrame {
        CapturedFrame {
            frame_number: 0,
            data: Bytes::from(vec![0u8; data_size]),
            data_size,
            uncompressed_size: 64 * 64 * 4,
            width: 64,
            height: 64,
            frame_rate: 60,
            timestamp_ms,
            unchanged,
        }
    }

    #[test]
    fn empty_and_single_frame_report_zero_rates() {
        let mut meter = ThroughputMeter::new();
        assert_eq!(meter.bytes_per_sec(), 0);
        assert_eq!(meter.frames_per_sec(), 0.0);
        assert!(meter.latency().is_none());

        meter.record_frame_at(&frame(5000, 100, false), Instant::now(), 100);
        assert_eq!(meter.bytes_per_sec(), 0);
        assert_eq!(meter.frames_per_sec(), 0.0);
        assert_eq!(meter.sample_count(), 1);
    }

    #[test]
    fn sixty_frames_in_one_second() {
        let mut meter = ThroughputMeter::with_window(Duration::from_secs(5));
        let t0 = Instant::now();
        for i in 0..=60u64 {
            let at = t0 + Duration::from_millis(i * 1000 / 60);
            meter.record_frame_at(&frame(1000, 0, false), at, 0);
        }
        let fps = meter.frames_per_sec();
        assert!((fps - 60.0).abs() < 1.0, "fps = {fps}");
        let bps = meter.bytes_per_sec();
        assert!((60_000..=62_000).contains(&bps), "bps = {bps}");
    }

    #[test]
    fn keepalives_are_counted_apart_from_changes() {
        let mut meter = ThroughputMeter::new();
        let t0 = Instant::now();
        for i in 0..10u64 {
            let at = t0 + Duration::from_millis(i * 10);
            meter.record_frame_at(&frame(40, 0, i % 2 == 1), at, 0);
        }
        assert_eq!(meter.keepalive_count(), 5);
        let all = meter.frames_per_sec();
        let changed = meter.changed_frames_per_sec();
        assert!(changed < all);
        assert!((meter.compression_ratio() - 40.0 / 16384.0).abs() < 1e-9);
    }

    #[test]
    fn expired_frames_leave_the_window() {
        let mut meter = ThroughputMeter::with_window(Duration::from_millis(500));
        let t0 = Instant::now();
        meter.record_frame_at(&frame(1000, 0, true), t0, 0);
        meter.record_frame_at(&frame(500, 0, false), t0 + Duration::from_secs(1), 0);
        assert_eq!(meter.sample_count(), 1);
        assert_eq!(meter.keepalive_count(), 0);
    }

    #[test]
    fn zero_latency_samples_are_averaged() {
        let mut meter = ThroughputMeter::new();
        let t0 = Instant::now();
        meter.record_frame_at(&frame(10, 1_000, false), t0, 1_000);
        assert_eq!(meter.latency(), Some(Duration::ZERO));

        // 0 + 0.125 * (8 - 0) = 1 ms
        meter.record_frame_at(&frame(10, 1_000, false), t0, 1_008);
        assert_eq!(meter.latency(), Some(Duration::from_millis(1)));
    }
}
