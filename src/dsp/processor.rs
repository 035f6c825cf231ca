use std::sync::Mutex;

use serde::Serialize;

use super::{
    AudioEqualizer, AutomaticGainControl, DspError, NoiseGate, SpectralNoiseReduction,
};
use crate::config::DspConfig;

/// Running totals over everything the chain has processed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DspStats {
    pub frames_processed: u64,
    pub samples_processed: u64,
    /// Slow-moving RMS level in dB (1% blend per frame).
    pub average_level_db: f32,
    pub peak_level_db: f32,
}

/// Owns the whole cleanup chain behind one lock, so reconfiguration
/// can never tear a frame that's mid-flight. If any stage misbehaves
/// the original audio passes through untouched.
pub struct DspProcessor {
    sample_rate: u32,
    inner: Mutex<ChainState>,
}

struct ChainState {
    config: DspConfig,
    gate: NoiseGate,
    noise_reduction: SpectralNoiseReduction,
    equalizer: AudioEqualizer,
    agc: AutomaticGainControl,
    stats: DspStats,
}

impl ChainState {
    fn build(sample_rate: u32, config: DspConfig, stats: DspStats) -> Self {
        let gate_cfg = &config.noise_gate;
        let gate = NoiseGate::new(
            gate_cfg.threshold_db,
            gate_cfg.attack_time,
            gate_cfg.release_time,
            sample_rate,
        );

        let reduction_cfg = &config.noise_reduction;
        let noise_reduction =
            SpectralNoiseReduction::new(reduction_cfg.frame_size, reduction_cfg.alpha);

        let equalizer = AudioEqualizer::from_config(sample_rate, &config.equalizer);

        let agc_cfg = &config.agc;
        let agc = AutomaticGainControl::new(
            agc_cfg.target_level_db,
            agc_cfg.attack_time,
            agc_cfg.release_time,
            agc_cfg.max_gain_db,
            sample_rate,
        );

        Self {
            config,
            gate,
            noise_reduction,
            equalizer,
            agc,
            stats,
        }
    }

    fn run_chain(&mut self, input: &[f32]) -> Result<Vec<f32>, DspError> {
        let mut audio = input.to_vec();
        if self.config.noise_gate.enabled {
            audio = self.gate.process(&audio);
            ensure_finite("noise gate", &audio)?;
        }
        if self.config.noise_reduction.enabled {
            audio = self.noise_reduction.process(&audio);
            ensure_finite("noise reduction", &audio)?;
        }
        if self.config.equalizer.enabled {
            audio = self.equalizer.process(&audio);
            ensure_finite("equalizer", &audio)?;
        }
        if self.config.agc.enabled {
            audio = self.agc.process(&audio);
            ensure_finite("agc", &audio)?;
        }
        Ok(audio)
    }

    fn update_stats(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        self.stats.frames_processed += 1;
        self.stats.samples_processed += samples.len() as u64;

        let mean_square =
            samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        let rms_db = 20.0 * (mean_square.sqrt() + 1e-10).log10();
        let peak = samples.iter().fold(0.0f32, |max, s| max.max(s.abs()));
        let peak_db = 20.0 * (peak + 1e-10).log10();

        self.stats.average_level_db = 0.99 * self.stats.average_level_db + 0.01 * rms_db;
        self.stats.peak_level_db = self.stats.peak_level_db.max(peak_db);
    }
}

fn ensure_finite(stage: &'static str, samples: &[f32]) -> Result<(), DspError> {
    if samples.iter().all(|s| s.is_finite()) {
        Ok(())
    } else {
        Err(DspError::NonFinite { stage })
    }
}

fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |max, s| max.max(s.abs()));
    if peak > 1.0 {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
}

impl DspProcessor {
    pub fn new(sample_rate: u32, config: DspConfig) -> Self {
        Self {
            sample_rate,
            inner: Mutex::new(ChainState::build(sample_rate, config, DspStats::default())),
        }
    }

    /// Run one block through the enabled stages. Any internal failure
    /// logs and returns the input unprocessed rather than dropping
    /// audio mid-transmission.
    pub fn process(&self, mut samples: Vec<f32>) -> Vec<f32> {
        if samples.is_empty() {
            return samples;
        }
        let Ok(mut state) = self.inner.lock() else {
            eprintln!("dsp chain unavailable ({}), passing audio through", DspError::Poisoned);
            return samples;
        };

        normalize_peak(&mut samples);
        if !state.config.any_stage_enabled() {
            state.update_stats(&samples);
            return samples;
        }

        match state.run_chain(&samples) {
            Ok(mut processed) => {
                state.update_stats(&processed);
                normalize_peak(&mut processed);
                processed
            }
            Err(e) => {
                eprintln!("dsp chain failed ({e}), passing audio through");
                samples
            }
        }
    }

    /// Swap in a new configuration. Filters are rebuilt from scratch,
    /// so envelope and spectral state reset; totals carry over.
    #[allow(dead_code)]
    pub fn update_config(&self, config: DspConfig) {
        let Ok(mut state) = self.inner.lock() else {
            eprintln!("dsp chain unavailable ({})", DspError::Poisoned);
            return;
        };
        let stats = state.stats.clone();
        *state = ChainState::build(self.sample_rate, config, stats);
    }

    #[cfg(test)]
    fn config(&self) -> DspConfig {
        self.inner
            .lock()
            .map(|state| state.config.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> DspStats {
        self.inner
            .lock()
            .map(|state| state.stats.clone())
            .unwrap_or_default()
    }

    #[allow(dead_code)]
    pub fn reset_stats(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.stats = DspStats::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;

    fn all_disabled() -> DspConfig {
        let mut config = DspConfig::default();
        config.noise_gate.enabled = false;
        config.agc.enabled = false;
        config.noise_reduction.enabled = false;
        config.equalizer.enabled = false;
        config
    }

    #[test]
    fn test_disabled_chain_passes_through() {
        let processor = DspProcessor::new(RATE, all_disabled());
        let input = vec![0.1, -0.2, 0.3, -0.4];
        assert_eq!(processor.process(input.clone()), input);
    }

    #[test]
    fn test_over_unit_input_is_normalized() {
        let processor = DspProcessor::new(RATE, all_disabled());
        let output = processor.process(vec![2.0, -1.0, 0.5]);
        let peak = output.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
        assert_eq!(output[0], 1.0);
    }

    #[test]
    fn test_default_chain_output_is_finite_and_bounded() {
        let processor = DspProcessor::new(RATE, DspConfig::default());
        let input: Vec<f32> = (0..4096).map(|i| ((i % 100) as f32 / 50.0) - 1.0).collect();
        let output = processor.process(input);
        assert_eq!(output.len(), 4096);
        assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    }

    #[test]
    fn test_non_finite_stage_fails_open() {
        let mut config = all_disabled();
        config.noise_gate.enabled = true;
        let processor = DspProcessor::new(RATE, config);

        let input = vec![0.5, f32::NAN, 0.25];
        let output = processor.process(input);
        assert_eq!(output.len(), 3);
        assert_eq!(output[0], 0.5);
        assert!(output[1].is_nan());
        assert_eq!(output[2], 0.25);
    }

    #[test]
    fn test_stats_accumulate_and_reset() {
        let processor = DspProcessor::new(RATE, all_disabled());
        processor.process(vec![0.5; 100]);
        processor.process(vec![0.5; 50]);

        let stats = processor.stats();
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.samples_processed, 150);
        assert!(stats.average_level_db < 0.0);

        processor.reset_stats();
        assert_eq!(processor.stats().frames_processed, 0);
    }

    #[test]
    fn test_empty_input_skips_stats() {
        let processor = DspProcessor::new(RATE, DspConfig::default());
        assert!(processor.process(Vec::new()).is_empty());
        assert_eq!(processor.stats().frames_processed, 0);
    }

    #[test]
    fn test_reconfigure_swaps_behavior() {
        let processor = DspProcessor::new(RATE, DspConfig::default());
        let input = vec![0.001f32; 512];
        let processed = processor.process(input.clone());
        assert_ne!(processed, input);

        processor.update_config(all_disabled());
        assert_eq!(processor.process(input.clone()), input);
        assert!(!processor.config().any_stage_enabled());
    }
}
