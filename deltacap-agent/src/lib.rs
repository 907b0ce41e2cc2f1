//! # deltacap-agent: Screen Capture Agent
//!
//! Foreground process that runs a deltacap capture session against the
//! local desktop (DXGI Desktop Duplication) or a synthetic test pattern,
//! meters the compressed output, and logs throughput once per second.
//!
//! When the desktop becomes unavailable (secure desktop, mode change,
//! GPU reset) the capture loop ends; the agent stops the session and
//! re-initializes it after a configurable delay.

pub mod config;
pub mod service;
