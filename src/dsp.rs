//! Audio cleanup chain. `DspProcessor` runs the enabled stages in a
//! fixed order: noise gate, spectral noise reduction, equalizer, AGC.

mod agc;
mod biquad;
mod equalizer;
mod gate;
mod processor;
mod spectral;

pub use agc::AutomaticGainControl;
pub use equalizer::AudioEqualizer;
pub use gate::NoiseGate;
pub use processor::{DspProcessor, DspStats};
pub use spectral::SpectralNoiseReduction;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DspError {
    #[error("{stage} stage produced non-finite samples")]
    NonFinite { stage: &'static str },
    #[error("dsp state lock poisoned")]
    Poisoned,
}

/// Smoothing coefficient for a time constant at a sample rate.
pub(crate) fn time_coefficient(time_secs: f64, sample_rate: u32) -> f32 {
    (-1.0 / (time_secs * f64::from(sample_rate))).exp() as f32
}

/// One-pole peak follower with separate attack and release speeds.
#[derive(Debug, Clone)]
pub(crate) struct EnvelopeFollower {
    attack: f32,
    release: f32,
    value: f32,
}

impl EnvelopeFollower {
    pub(crate) fn new(attack_secs: f64, release_secs: f64, sample_rate: u32) -> Self {
        Self {
            attack: time_coefficient(attack_secs, sample_rate),
            release: time_coefficient(release_secs, sample_rate),
            value: 0.0,
        }
    }

    /// Advance by one rectified sample and return the new envelope.
    pub(crate) fn track(&mut self, magnitude: f32) -> f32 {
        let coeff = if magnitude > self.value {
            self.attack
        } else {
            self.release
        };
        self.value = magnitude + coeff * (self.value - magnitude);
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_coefficient_range() {
        let coeff = time_coefficient(0.001, 48_000);
        assert!(coeff > 0.0 && coeff < 1.0);
        // longer time constants smooth harder
        assert!(time_coefficient(0.1, 48_000) > coeff);
    }

    #[test]
    fn test_envelope_rises_and_decays() {
        let mut follower = EnvelopeFollower::new(0.001, 0.1, 48_000);
        let mut rising = 0.0;
        for _ in 0..500 {
            rising = follower.track(1.0);
        }
        assert!(rising > 0.99);

        let mut decayed = rising;
        for _ in 0..500 {
            decayed = follower.track(0.0);
        }
        assert!(decayed < rising);
        assert!(decayed > 0.0);
    }
}
