//! # DAF Engine
//!
//! Real-time Delayed Auditory Feedback: captures microphone audio, delays and
//! conditions it, and plays it back to the listener with minimal added latency.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              ENGINE                                   │
//! │  ┌────────────┐     ┌──────────────────────────────┐    ┌─────────┐ │
//! │  │ Microphone │     │   Signal Chain (graph)        │    │ Stereo  │ │
//! │  │  (capture  │ ──▶ │                               │ ──▶│ output  │ │
//! │  │  callback) │     │  direct:   delay ─▶ fan-out   │    │ (play-  │ │
//! │  └─────┬──────┘     │  standard: gain ─▶ [hp ─▶ lp  │    │  back)  │ │
//! │        │            │   ─▶ gate ─▶ comp] ─▶ delay   │    └─────────┘ │
//! │        ▼            │   ─▶ fan-out                  │                │
//! │  ┌────────────┐     └──────────────────────────────┘                │
//! │  │ Lock-free  │                    ▲                                 │
//! │  │ block queue│────────────────────┘ (playback callback pulls)       │
//! │  └────────────┘                                                      │
//! │                                                                      │
//! │  Lifecycle: Idle → Acquiring → Running → Suspended → Stopping → Idle │
//! │  Resume protocol: bounded exponential backoff, max 5 attempts        │
//! │  Device manager: enumerate / classify / hot-swap capture devices     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine reports everything user-visible through a [`StatusSink`] and
//! never reads UI state back. Cross-context coordination (keep-alive,
//! visibility broadcasts) goes through a [`BackgroundCoordinator`] that
//! degrades to a no-op when no channel is attached.
//!
//! [`StatusSink`]: status::StatusSink
//! [`BackgroundCoordinator`]: engine::background::BackgroundCoordinator

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod status;

pub use config::ProcessingConfig;
pub use engine::{Engine, EngineState};
pub use error::{Error, Result};
pub use graph::{select_latency_mode, LatencyMode};
pub use status::{Severity, StatusSink};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Maximum feedback delay in milliseconds
    pub const MAX_DELAY_MS: f32 = 500.0;

    /// Delay at or below this threshold selects the direct (bypass) path
    pub const LOW_LATENCY_THRESHOLD_MS: f32 = 5.0;

    /// Floor applied to the delay-time parameter; the underlying delay line
    /// must never be configured with exactly zero seconds
    pub const MIN_DELAY_SECS: f32 = 1e-6;

    /// Maximum gain multiplier accepted from callers
    pub const MAX_GAIN: f32 = 20.0;

    /// Base cutoff for the noise-reduction low-pass at 100 percent strength
    pub const NOISE_BASE_CUTOFF_HZ: f32 = 4000.0;

    /// Cutoff ceiling as noise-reduction strength approaches zero
    pub const NOISE_CUTOFF_CEILING_HZ: f32 = 20000.0;

    /// High-pass corner for the noise-reduction sub-chain (removes rumble)
    pub const NOISE_HIGHPASS_HZ: f32 = 80.0;

    /// Maximum consecutive failed context-resume attempts
    pub const MAX_RESUME_ATTEMPTS: u32 = 5;

    /// Base delay for the resume backoff schedule (doubles per attempt)
    pub const RESUME_BASE_DELAY_MS: u64 = 100;

    /// Settle delay between releasing one capture device and opening another
    pub const DEVICE_SETTLE_MS: u64 = 200;

    /// Lock-free block queue capacity (in capture blocks)
    pub const BLOCK_QUEUE_CAPACITY: usize = 256;

    /// Interval between elapsed-time reports to the status sink
    pub const TIMER_TICK_MS: u64 = 1000;

    /// Interval between context suspend-detection checks
    pub const MONITOR_TICK_MS: u64 = 250;
}
