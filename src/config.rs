//! Immutable processing configuration
//!
//! The engine replaces the whole value on every update call, so partially
//! applied parameter sets are never observable.

use crate::constants::{MAX_DELAY_MS, MAX_GAIN};

/// Value object describing the feedback signal path.
///
/// Constructed via [`ProcessingConfig::default`] and the `with_*` builders,
/// which clamp out-of-range values instead of failing. Last write wins; there
/// is no history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingConfig {
    delay_ms: f32,
    gain: f32,
    noise_reduction_percent: Option<f32>,
    pitch_semitones: Option<f32>,
    low_latency_enabled: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            delay_ms: 100.0,
            gain: 1.0,
            noise_reduction_percent: None,
            pitch_semitones: None,
            low_latency_enabled: true,
        }
    }
}

impl ProcessingConfig {
    /// Feedback delay in milliseconds (0..=500)
    pub fn delay_ms(&self) -> f32 {
        self.delay_ms
    }

    /// Linear gain multiplier (0..=20)
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Noise-reduction strength in percent (0..=100), if enabled
    pub fn noise_reduction_percent(&self) -> Option<f32> {
        self.noise_reduction_percent
    }

    /// Reserved; pitch shifting is unimplemented
    pub fn pitch_semitones(&self) -> Option<f32> {
        self.pitch_semitones
    }

    /// Whether the direct low-latency path may be chosen at small delays
    pub fn low_latency_enabled(&self) -> bool {
        self.low_latency_enabled
    }

    /// Returns a copy with the delay replaced, clamped to 0..=500 ms
    pub fn with_delay_ms(self, delay_ms: f32) -> Self {
        Self {
            delay_ms: delay_ms.clamp(0.0, MAX_DELAY_MS),
            ..self
        }
    }

    /// Returns a copy with the gain replaced, clamped to 0..=20
    pub fn with_gain(self, gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, MAX_GAIN),
            ..self
        }
    }

    /// Returns a copy with noise reduction set; values are clamped to
    /// 0..=100 and a strength of 0 disables the sub-chain entirely
    pub fn with_noise_reduction(self, percent: Option<f32>) -> Self {
        let percent = percent
            .map(|p| p.clamp(0.0, 100.0))
            .filter(|p| *p > 0.0);
        Self {
            noise_reduction_percent: percent,
            ..self
        }
    }

    /// Returns a copy with the low-latency path enabled or disabled
    pub fn with_low_latency(self, enabled: bool) -> Self {
        Self {
            low_latency_enabled: enabled,
            ..self
        }
    }

    /// True when the conditioning sub-chain can be skipped: unity-or-less
    /// gain and no noise reduction requested. Toggling this across an update
    /// is a mode-relevant boundary that forces a graph rebuild.
    pub fn is_bypass_eligible(&self) -> bool {
        self.gain <= 1.0 && self.noise_reduction_percent.is_none()
    }
}
