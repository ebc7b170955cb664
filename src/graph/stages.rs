//! DSP stages composed into the feedback signal chain
//!
//! Every stage processes mono f32 samples one at a time and is cheap enough
//! to run inside the playback callback. Stage parameters are set at build
//! time; only gain and delay support in-place updates (the others force a
//! chain rebuild).

use crate::constants::MIN_DELAY_SECS;

/// Linear gain multiplier
#[derive(Debug, Clone)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[inline]
    pub fn process(&self, sample: f32) -> f32 {
        sample * self.gain
    }
}

/// Filter topology for [`Biquad`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    HighPass,
    LowPass,
}

/// Second-order IIR filter (RBJ cookbook), transposed direct form II
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: FilterKind,
    cutoff_hz: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    /// Butterworth-style Q for a single second-order section
    const Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

    pub fn highpass(sample_rate: u32, cutoff_hz: f32) -> Self {
        Self::new(FilterKind::HighPass, sample_rate, cutoff_hz)
    }

    pub fn lowpass(sample_rate: u32, cutoff_hz: f32) -> Self {
        Self::new(FilterKind::LowPass, sample_rate, cutoff_hz)
    }

    fn new(kind: FilterKind, sample_rate: u32, cutoff_hz: f32) -> Self {
        // Keep the corner safely below Nyquist
        let cutoff_hz = cutoff_hz.clamp(1.0, sample_rate as f32 * 0.45);
        let omega = 2.0 * std::f32::consts::PI * cutoff_hz / sample_rate as f32;
        let (sn, cs) = omega.sin_cos();
        let alpha = sn / (2.0 * Self::Q);

        let (b0, b1, b2) = match kind {
            FilterKind::LowPass => {
                let b1 = 1.0 - cs;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterKind::HighPass => {
                let b1 = -(1.0 + cs);
                (-b1 / 2.0, b1, -b1 / 2.0)
            }
        };
        let a0 = 1.0 + alpha;

        Self {
            kind,
            cutoff_hz,
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cs / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Downward noise gate with a smoothed open/close transition
#[derive(Debug, Clone)]
pub struct NoiseGate {
    threshold: f32,
    envelope: f32,
    gate_gain: f32,
    release_coeff: f32,
    smoothing: f32,
}

impl NoiseGate {
    pub fn new(sample_rate: u32, threshold_db: f32) -> Self {
        // ~50ms peak-envelope release
        let release_coeff = (-1.0 / (sample_rate as f32 * 0.050)).exp();
        Self {
            threshold: db_to_linear(threshold_db),
            envelope: 0.0,
            gate_gain: 1.0,
            release_coeff,
            // ~5ms gain ramp keeps the gate click-free
            smoothing: 1.0 - (-1.0 / (sample_rate as f32 * 0.005)).exp(),
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let rectified = x.abs();
        self.envelope = rectified.max(self.envelope * self.release_coeff);
        let target = if self.envelope >= self.threshold {
            1.0
        } else {
            0.0
        };
        self.gate_gain += (target - self.gate_gain) * self.smoothing;
        x * self.gate_gain
    }
}

/// Feed-forward compressor with fixed ratio and program-dependent envelope
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    envelope: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl Compressor {
    pub fn new(sample_rate: u32, threshold_db: f32, ratio: f32) -> Self {
        Self {
            threshold_db,
            ratio: ratio.max(1.0),
            envelope: 0.0,
            attack_coeff: (-1.0 / (sample_rate as f32 * 0.005)).exp(),
            release_coeff: (-1.0 / (sample_rate as f32 * 0.100)).exp(),
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let rectified = x.abs();
        let coeff = if rectified > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * rectified;

        let env_db = linear_to_db(self.envelope);
        if env_db <= self.threshold_db {
            return x;
        }
        let over_db = env_db - self.threshold_db;
        let reduction_db = over_db * (1.0 - 1.0 / self.ratio);
        x * db_to_linear(-reduction_db)
    }
}

/// Integer-sample circular delay line.
///
/// The applied delay time is floored at [`MIN_DELAY_SECS`]; a requested delay
/// of exactly zero never reaches the underlying buffer as zero (zero-length
/// delay buffers are undefined in several audio runtimes).
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    delay_secs: f32,
    sample_rate: u32,
}

impl DelayLine {
    pub fn new(sample_rate: u32, max_delay_secs: f32, delay_secs: f32) -> Self {
        let capacity = ((max_delay_secs * sample_rate as f32).ceil() as usize).max(1) + 1;
        let mut line = Self {
            buffer: vec![0.0; capacity],
            write_pos: 0,
            delay_samples: 0,
            delay_secs: MIN_DELAY_SECS,
            sample_rate,
        };
        line.set_delay_secs(delay_secs);
        line
    }

    /// Sets the delay, flooring the applied value at [`MIN_DELAY_SECS`]
    pub fn set_delay_secs(&mut self, delay_secs: f32) {
        let floored = delay_secs.max(MIN_DELAY_SECS);
        let max_samples = self.buffer.len() - 1;
        self.delay_secs = floored;
        self.delay_samples =
            ((floored * self.sample_rate as f32).round() as usize).min(max_samples);
    }

    /// The delay actually applied, in seconds (always >= the epsilon floor)
    pub fn delay_secs(&self) -> f32 {
        self.delay_secs
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.buffer[self.write_pos] = x;
        let read_pos =
            (self.write_pos + self.buffer.len() - self.delay_samples) % self.buffer.len();
        let out = self.buffer[read_pos];
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        out
    }
}

#[inline]
fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-10).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SR: u32 = 48000;

    #[test]
    fn test_gain_stage() {
        let stage = GainStage::new(2.0);
        assert_eq!(stage.process(0.25), 0.5);
    }

    #[test]
    fn test_delay_line_delays_by_n_samples() {
        let mut delay = DelayLine::new(SR, 0.5, 3.0 / SR as f32);
        assert_eq!(delay.delay_samples(), 3);

        assert_eq!(delay.process(1.0), 0.0);
        assert_eq!(delay.process(0.0), 0.0);
        assert_eq!(delay.process(0.0), 0.0);
        // The impulse emerges after exactly 3 samples
        assert_eq!(delay.process(0.0), 1.0);
    }

    #[test]
    fn test_delay_zero_input_floored_to_epsilon() {
        let delay = DelayLine::new(SR, 0.5, 0.0);
        assert!(delay.delay_secs() >= MIN_DELAY_SECS);
        assert!(delay.delay_secs() > 0.0);
    }

    #[test]
    fn test_epsilon_delay_passes_through() {
        // Below one sample period the line rounds to zero samples and must
        // still behave: current sample out, no stale data
        let mut delay = DelayLine::new(SR, 0.5, MIN_DELAY_SECS);
        assert_eq!(delay.delay_samples(), 0);
        assert_eq!(delay.process(0.7), 0.7);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut filter = Biquad::highpass(SR, 80.0);
        let mut last = 1.0;
        for _ in 0..SR {
            last = filter.process(1.0);
        }
        assert!(last.abs() < 0.01, "DC should decay, got {last}");
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut filter = Biquad::lowpass(SR, 4000.0);
        let mut last = 0.0;
        for _ in 0..SR {
            last = filter.process(1.0);
        }
        assert!((last - 1.0).abs() < 0.01, "DC should pass, got {last}");
    }

    #[test]
    fn test_filter_cutoff_clamped_below_nyquist() {
        let filter = Biquad::lowpass(SR, 100_000.0);
        assert!(filter.cutoff_hz() < SR as f32 / 2.0);
    }

    #[test]
    fn test_noise_gate_attenuates_quiet_signal() {
        let mut gate = NoiseGate::new(SR, -40.0);
        let quiet = 0.001;
        let mut out = quiet;
        for _ in 0..SR / 10 {
            out = gate.process(quiet);
        }
        assert!(out.abs() < quiet / 10.0);
    }

    #[test]
    fn test_noise_gate_passes_loud_signal() {
        let mut gate = NoiseGate::new(SR, -40.0);
        let loud = 0.5;
        let mut out = 0.0;
        for _ in 0..SR / 10 {
            out = gate.process(loud);
        }
        assert!((out - loud).abs() < 0.01);
    }

    #[test]
    fn test_compressor_reduces_loud_signal() {
        let mut comp = Compressor::new(SR, -20.0, 4.0);
        let mut out = 0.0;
        for _ in 0..SR / 10 {
            out = comp.process(0.9);
        }
        assert!(out < 0.9);
        assert!(out > 0.0);
    }

    #[test]
    fn test_compressor_leaves_quiet_signal_alone() {
        let mut comp = Compressor::new(SR, -20.0, 4.0);
        let mut out = 0.0;
        for _ in 0..SR / 10 {
            out = comp.process(0.01);
        }
        assert!((out - 0.01).abs() < 1e-4);
    }

    proptest! {
        #[test]
        fn prop_delay_floor_holds(secs in -1.0f32..0.6) {
            let mut delay = DelayLine::new(SR, 0.5, 0.1);
            delay.set_delay_secs(secs);
            prop_assert!(delay.delay_secs() >= MIN_DELAY_SECS);
        }

        #[test]
        fn prop_delay_output_is_bounded(samples in proptest::collection::vec(-1.0f32..1.0, 1..512)) {
            let mut delay = DelayLine::new(SR, 0.5, 0.01);
            for s in samples {
                let out = delay.process(s);
                prop_assert!(out >= -1.0 && out <= 1.0);
            }
        }
    }
}
