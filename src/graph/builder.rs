//! Signal-chain construction and reconfiguration
//!
//! The chain is either fully built and consistent with the config it was
//! built from, or entirely empty. Teardown runs synchronously before every
//! rebuild so no partially-wired state is ever observable.

use crate::config::ProcessingConfig;
use crate::constants::{
    LOW_LATENCY_THRESHOLD_MS, NOISE_BASE_CUTOFF_HZ, NOISE_CUTOFF_CEILING_HZ, NOISE_HIGHPASS_HZ,
};
use crate::graph::stages::{Biquad, Compressor, DelayLine, GainStage, NoiseGate};

/// Graph topology choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMode {
    /// Shortest possible path: source -> delay(~0) -> stereo fan-out.
    /// Chosen when the delay is small enough that round-trip latency
    /// dominates; conditioning stages are skipped entirely rather than
    /// set to unity.
    Direct,
    /// Full conditioning chain: gain staging, optional noise-reduction
    /// sub-chain, then delay and stereo fan-out.
    Standard,
}

/// Single decision point for the mode choice, consulted by every update path
pub fn select_latency_mode(config: &ProcessingConfig) -> LatencyMode {
    if config.delay_ms() <= LOW_LATENCY_THRESHOLD_MS && config.low_latency_enabled() {
        LatencyMode::Direct
    } else {
        LatencyMode::Standard
    }
}

/// Maps noise-reduction strength to the low-pass corner. Stronger reduction
/// lowers the cutoff; as strength approaches zero the cutoff is clamped to
/// a ceiling instead of diverging.
pub fn noise_reduction_cutoff_hz(percent: f32) -> f32 {
    let fraction = (percent / 100.0).max(f32::EPSILON);
    (NOISE_BASE_CUTOFF_HZ / fraction).min(NOISE_CUTOFF_CEILING_HZ)
}

/// Structural description of a built chain, used to verify that a rebuild
/// produced the same graph as a fresh build for the same config
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTopology {
    pub mode: LatencyMode,
    pub has_gain: bool,
    pub has_noise_reduction: bool,
    pub gain: Option<f32>,
    pub delay_secs: f32,
}

/// The currently-connected processing stages.
///
/// Exclusively owned by the engine; shared with the playback callback behind
/// a mutex. Gate/compressor stages carry per-sample state, so the chain is
/// processed by exactly one caller at a time.
pub struct SignalChain {
    sample_rate: u32,
    mode: Option<LatencyMode>,
    gain: Option<GainStage>,
    highpass: Option<Biquad>,
    lowpass: Option<Biquad>,
    gate: Option<NoiseGate>,
    compressor: Option<Compressor>,
    delay: Option<DelayLine>,
    built_for: Option<ProcessingConfig>,
}

impl SignalChain {
    /// Maximum delay the line is allocated for, in seconds
    const MAX_DELAY_SECS: f32 = 0.5;

    /// Gate threshold used inside the noise-reduction sub-chain
    const GATE_THRESHOLD_DB: f32 = -45.0;

    /// Compressor settings for the noise-reduction sub-chain
    const COMP_THRESHOLD_DB: f32 = -18.0;
    const COMP_RATIO: f32 = 3.0;

    /// Creates an empty (torn-down) chain
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            mode: None,
            gain: None,
            highpass: None,
            lowpass: None,
            gate: None,
            compressor: None,
            delay: None,
            built_for: None,
        }
    }

    /// Builds all stages for the mode selected from `config`.
    ///
    /// Any previous stages are torn down first, so the chain transitions
    /// empty -> built atomically from the caller's point of view.
    pub fn build(&mut self, config: &ProcessingConfig) {
        self.teardown();

        let mode = select_latency_mode(config);
        let delay_secs = config.delay_ms() / 1000.0;

        if mode == LatencyMode::Standard {
            self.gain = Some(GainStage::new(config.gain()));
            if let Some(percent) = config.noise_reduction_percent() {
                let cutoff = noise_reduction_cutoff_hz(percent);
                self.highpass = Some(Biquad::highpass(self.sample_rate, NOISE_HIGHPASS_HZ));
                self.lowpass = Some(Biquad::lowpass(self.sample_rate, cutoff));
                self.gate = Some(NoiseGate::new(self.sample_rate, Self::GATE_THRESHOLD_DB));
                self.compressor = Some(Compressor::new(
                    self.sample_rate,
                    Self::COMP_THRESHOLD_DB,
                    Self::COMP_RATIO,
                ));
            }
        }

        self.delay = Some(DelayLine::new(
            self.sample_rate,
            Self::MAX_DELAY_SECS,
            delay_secs,
        ));
        self.mode = Some(mode);
        self.built_for = Some(*config);
    }

    /// Disconnects every stage. Safe to call on a partially-built or already
    /// empty chain.
    pub fn teardown(&mut self) {
        self.mode = None;
        self.gain = None;
        self.highpass = None;
        self.lowpass = None;
        self.gate = None;
        self.compressor = None;
        self.delay = None;
        self.built_for = None;
    }

    /// Teardown followed by build. Idempotent for a given config.
    pub fn rebuild(&mut self, config: &ProcessingConfig) {
        self.teardown();
        self.build(config);
    }

    /// True when a config change crosses a mode-relevant threshold and the
    /// graph must be rebuilt rather than tweaked in place
    pub fn needs_rebuild(&self, new_config: &ProcessingConfig) -> bool {
        let Some(current) = &self.built_for else {
            return true;
        };
        select_latency_mode(current) != select_latency_mode(new_config)
            || current.is_bypass_eligible() != new_config.is_bypass_eligible()
            || current.noise_reduction_percent() != new_config.noise_reduction_percent()
    }

    /// In-place parameter update for changes that do not cross a mode
    /// boundary. Callers must check [`needs_rebuild`](Self::needs_rebuild)
    /// first.
    pub fn apply_parameters(&mut self, config: &ProcessingConfig) {
        if let Some(delay) = &mut self.delay {
            delay.set_delay_secs(config.delay_ms() / 1000.0);
        }
        if let Some(gain) = &mut self.gain {
            gain.set_gain(config.gain());
        }
        if let Some(built_for) = &mut self.built_for {
            *built_for = *config;
        }
    }

    /// True when all stages for the current mode are connected
    pub fn is_built(&self) -> bool {
        self.mode.is_some()
    }

    /// The mode this chain was built for, if built
    pub fn mode(&self) -> Option<LatencyMode> {
        self.mode
    }

    /// The config this chain was built for, if built
    pub fn built_for(&self) -> Option<&ProcessingConfig> {
        self.built_for.as_ref()
    }

    /// Structural snapshot for topology comparisons
    pub fn topology(&self) -> Option<ChainTopology> {
        let mode = self.mode?;
        Some(ChainTopology {
            mode,
            has_gain: self.gain.is_some(),
            has_noise_reduction: self.highpass.is_some()
                && self.lowpass.is_some()
                && self.gate.is_some()
                && self.compressor.is_some(),
            gain: self.gain.as_ref().map(|g| g.gain()),
            delay_secs: self.delay.as_ref().map(|d| d.delay_secs()).unwrap_or(0.0),
        })
    }

    /// Checks the fully-connected-or-empty invariant: every stage the mode
    /// requires is present, or no stage is present at all
    pub fn is_consistent(&self) -> bool {
        match self.mode {
            None => {
                self.gain.is_none()
                    && self.highpass.is_none()
                    && self.lowpass.is_none()
                    && self.gate.is_none()
                    && self.compressor.is_none()
                    && self.delay.is_none()
            }
            Some(LatencyMode::Direct) => {
                self.delay.is_some() && self.gain.is_none() && self.highpass.is_none()
            }
            Some(LatencyMode::Standard) => {
                let nr_stages = [
                    self.highpass.is_some(),
                    self.lowpass.is_some(),
                    self.gate.is_some(),
                    self.compressor.is_some(),
                ];
                let nr_consistent = nr_stages.iter().all(|p| *p) || nr_stages.iter().all(|p| !*p);
                self.delay.is_some() && self.gain.is_some() && nr_consistent
            }
        }
    }

    /// Runs a block of mono input through the chain, duplicating the single
    /// channel to both output channels (never leave one ear silent).
    ///
    /// `stereo_out` must hold exactly `2 * mono_in.len()` interleaved
    /// samples. An empty (torn-down) chain writes silence.
    pub fn process_block(&mut self, mono_in: &[f32], stereo_out: &mut [f32]) {
        debug_assert_eq!(stereo_out.len(), mono_in.len() * 2);

        if self.mode.is_none() {
            stereo_out.fill(0.0);
            return;
        }

        for (i, &sample) in mono_in.iter().enumerate() {
            let mut s = sample;
            if let Some(gain) = &self.gain {
                s = gain.process(s);
            }
            if let Some(hp) = &mut self.highpass {
                s = hp.process(s);
            }
            if let Some(lp) = &mut self.lowpass {
                s = lp.process(s);
            }
            if let Some(gate) = &mut self.gate {
                s = gate.process(s);
            }
            if let Some(comp) = &mut self.compressor {
                s = comp.process(s);
            }
            if let Some(delay) = &mut self.delay {
                s = delay.process(s);
            }
            stereo_out[2 * i] = s;
            stereo_out[2 * i + 1] = s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MIN_DELAY_SECS;

    const SR: u32 = 48000;

    fn built(config: &ProcessingConfig) -> SignalChain {
        let mut chain = SignalChain::empty(SR);
        chain.build(config);
        chain
    }

    #[test]
    fn test_mode_selection() {
        let config = ProcessingConfig::default();
        assert_eq!(
            select_latency_mode(&config.with_delay_ms(100.0)),
            LatencyMode::Standard
        );
        assert_eq!(
            select_latency_mode(&config.with_delay_ms(2.0)),
            LatencyMode::Direct
        );
        // Boundary: exactly at the threshold is still direct
        assert_eq!(
            select_latency_mode(&config.with_delay_ms(5.0)),
            LatencyMode::Direct
        );
        // Low-latency disabled forces standard even at tiny delays
        assert_eq!(
            select_latency_mode(&config.with_delay_ms(2.0).with_low_latency(false)),
            LatencyMode::Standard
        );
    }

    #[test]
    fn test_noise_cutoff_mapping() {
        assert_eq!(noise_reduction_cutoff_hz(100.0), 4000.0);
        assert_eq!(noise_reduction_cutoff_hz(50.0), 8000.0);
        // Clamped to the ceiling near zero
        assert_eq!(noise_reduction_cutoff_hz(0.001), 20000.0);
    }

    #[test]
    fn test_direct_build_has_minimal_topology() {
        let chain = built(&ProcessingConfig::default().with_delay_ms(2.0));
        let topo = chain.topology().unwrap();
        assert_eq!(topo.mode, LatencyMode::Direct);
        assert!(!topo.has_gain);
        assert!(!topo.has_noise_reduction);
        assert!(chain.is_consistent());
    }

    #[test]
    fn test_standard_build_with_noise_reduction() {
        let config = ProcessingConfig::default()
            .with_delay_ms(100.0)
            .with_gain(5.0)
            .with_noise_reduction(Some(50.0));
        let chain = built(&config);
        let topo = chain.topology().unwrap();
        assert_eq!(topo.mode, LatencyMode::Standard);
        assert!(topo.has_gain);
        assert!(topo.has_noise_reduction);
        assert_eq!(topo.gain, Some(5.0));
        assert!(chain.is_consistent());
    }

    #[test]
    fn test_standard_build_gain_one_bypasses_noise_reduction() {
        // gain=1 with no noise reduction is the bypass-eligible boundary:
        // standard mode still applies, conditioning sub-chain does not
        let config = ProcessingConfig::default().with_delay_ms(20.0).with_gain(1.0);
        let chain = built(&config);
        let topo = chain.topology().unwrap();
        assert_eq!(topo.mode, LatencyMode::Standard);
        assert!(!topo.has_noise_reduction);
    }

    #[test]
    fn test_delay_zero_gets_epsilon_floor() {
        let chain = built(&ProcessingConfig::default().with_delay_ms(0.0));
        let topo = chain.topology().unwrap();
        assert!(topo.delay_secs >= MIN_DELAY_SECS);
        assert!(topo.delay_secs > 0.0);
    }

    #[test]
    fn test_teardown_empties_everything() {
        let mut chain = built(&ProcessingConfig::default());
        chain.teardown();
        assert!(!chain.is_built());
        assert!(chain.is_consistent());
        assert!(chain.topology().is_none());
        // Safe on an already-empty chain
        chain.teardown();
    }

    #[test]
    fn test_rebuild_matches_fresh_build() {
        let old = ProcessingConfig::default().with_delay_ms(100.0);
        let new = old.with_delay_ms(2.0);

        let mut rebuilt = built(&old);
        assert!(rebuilt.needs_rebuild(&new));
        rebuilt.rebuild(&new);

        let fresh = built(&new);
        assert_eq!(rebuilt.topology(), fresh.topology());
        assert_eq!(rebuilt.mode(), Some(LatencyMode::Direct));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let config = ProcessingConfig::default().with_gain(3.0);
        let mut chain = built(&config);
        let first = chain.topology();
        chain.rebuild(&config);
        assert_eq!(chain.topology(), first);
    }

    #[test]
    fn test_needs_rebuild_only_on_mode_boundaries() {
        let config = ProcessingConfig::default().with_delay_ms(100.0);
        let chain = built(&config);

        // Delay change within standard mode: in-place
        assert!(!chain.needs_rebuild(&config.with_delay_ms(200.0)));
        // Delay crossing the low-latency boundary: rebuild
        assert!(chain.needs_rebuild(&config.with_delay_ms(2.0)));
        // Gain leaving bypass-eligible: rebuild
        assert!(chain.needs_rebuild(&config.with_gain(5.0)));
        // Noise reduction toggling on: rebuild
        assert!(chain.needs_rebuild(&config.with_noise_reduction(Some(30.0))));
    }

    #[test]
    fn test_in_place_parameter_update() {
        let config = ProcessingConfig::default().with_delay_ms(100.0).with_gain(5.0);
        let mut chain = built(&config);

        let new = config.with_delay_ms(200.0);
        assert!(!chain.needs_rebuild(&new));
        chain.apply_parameters(&new);

        let topo = chain.topology().unwrap();
        assert!((topo.delay_secs - 0.2).abs() < 1e-4);
        assert_eq!(chain.built_for(), Some(&new));
    }

    #[test]
    fn test_stereo_fan_out_duplicates_channel() {
        let mut chain = built(&ProcessingConfig::default().with_delay_ms(2.0));
        // Warm past the delay so input reaches the output
        let samples_in_delay = (0.002 * SR as f32).round() as usize;
        let mono = vec![0.5; samples_in_delay + 4];
        let mut stereo = vec![0.0; mono.len() * 2];
        chain.process_block(&mono, &mut stereo);

        let last_l = stereo[stereo.len() - 2];
        let last_r = stereo[stereo.len() - 1];
        assert_eq!(last_l, last_r);
        assert!(last_l != 0.0, "neither ear may be silent");
    }

    #[test]
    fn test_empty_chain_outputs_silence() {
        let mut chain = SignalChain::empty(SR);
        let mono = vec![0.9; 16];
        let mut stereo = vec![1.0; 32];
        chain.process_block(&mono, &mut stereo);
        assert!(stereo.iter().all(|s| *s == 0.0));
    }
}
