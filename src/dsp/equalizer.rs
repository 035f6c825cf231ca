use super::biquad::{BiquadCoeffs, filtfilt};
use crate::config::EqualizerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BandKind {
    Highpass,
    Bell,
    Lowpass,
}

#[derive(Debug, Clone)]
struct Band {
    name: &'static str,
    freq_hz: f32,
    q: f32,
    kind: BandKind,
    gain_db: f32,
}

/// Eight fixed bands from rumble to hiss. A band only runs when its
/// gain magnitude reaches 0.1 dB; bell bands boost with a peaking
/// filter and cut with a notch. Every pass is zero-phase.
pub struct AudioEqualizer {
    sample_rate: f32,
    bands: Vec<Band>,
}

const BAND_LAYOUT: [(&str, f32, f32, BandKind); 8] = [
    ("sub_bass", 60.0, 1.0, BandKind::Highpass),
    ("bass", 200.0, 0.7, BandKind::Bell),
    ("low_mid", 500.0, 0.7, BandKind::Bell),
    ("mid", 1000.0, 0.7, BandKind::Bell),
    ("high_mid", 2000.0, 0.7, BandKind::Bell),
    ("presence", 4000.0, 0.7, BandKind::Bell),
    ("brilliance", 8000.0, 1.0, BandKind::Bell),
    ("air", 12000.0, 1.0, BandKind::Lowpass),
];

const BYPASS_BELOW_DB: f32 = 0.1;

impl AudioEqualizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            bands: BAND_LAYOUT
                .iter()
                .map(|&(name, freq_hz, q, kind)| Band {
                    name,
                    freq_hz,
                    q,
                    kind,
                    gain_db: 0.0,
                })
                .collect(),
        }
    }

    pub fn from_config(sample_rate: u32, config: &EqualizerConfig) -> Self {
        let mut equalizer = Self::new(sample_rate);
        equalizer.apply_config(config);
        equalizer
    }

    pub fn apply_config(&mut self, config: &EqualizerConfig) {
        self.set_gain("sub_bass", config.sub_bass_gain as f32);
        self.set_gain("bass", config.bass_gain as f32);
        self.set_gain("low_mid", config.low_mid_gain as f32);
        self.set_gain("mid", config.mid_gain as f32);
        self.set_gain("high_mid", config.high_mid_gain as f32);
        self.set_gain("presence", config.presence_gain as f32);
        self.set_gain("brilliance", config.brilliance_gain as f32);
        self.set_gain("air", config.air_gain as f32);
    }

    /// Unknown band names are ignored.
    pub fn set_gain(&mut self, name: &str, gain_db: f32) {
        if let Some(band) = self.bands.iter_mut().find(|b| b.name == name) {
            band.gain_db = gain_db;
        }
    }

    #[cfg(test)]
    fn gain(&self, name: &str) -> Option<f32> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.gain_db)
    }

    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let mut output = samples.to_vec();
        for band in &self.bands {
            if band.gain_db.abs() < BYPASS_BELOW_DB {
                continue;
            }
            output = filtfilt(band.coefficients(self.sample_rate), &output);
        }
        output
    }
}

impl Band {
    fn coefficients(&self, sample_rate: f32) -> BiquadCoeffs {
        match self.kind {
            // the edge bands are on/off filters; gain only arms them
            BandKind::Highpass => BiquadCoeffs::highpass(self.freq_hz, self.q, sample_rate),
            BandKind::Lowpass => BiquadCoeffs::lowpass(self.freq_hz, self.q, sample_rate),
            BandKind::Bell => {
                if self.gain_db > 0.0 {
                    BiquadCoeffs::peaking(self.freq_hz, self.q, self.gain_db, sample_rate)
                } else {
                    BiquadCoeffs::notch(self.freq_hz, self.q, sample_rate)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const RATE: u32 = 48_000;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / RATE as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    fn mid(samples: &[f32]) -> &[f32] {
        &samples[samples.len() / 4..3 * samples.len() / 4]
    }

    #[test]
    fn test_flat_gains_pass_through() {
        let equalizer = AudioEqualizer::new(RATE);
        let input = sine(440.0, 512);
        assert_eq!(equalizer.process(&input), input);
    }

    #[test]
    fn test_tiny_gains_bypass() {
        let mut equalizer = AudioEqualizer::new(RATE);
        equalizer.set_gain("mid", 0.05);
        let input = sine(1000.0, 512);
        assert_eq!(equalizer.process(&input), input);
    }

    #[test]
    fn test_mid_boost_amplifies_center_tone() {
        let mut equalizer = AudioEqualizer::new(RATE);
        equalizer.set_gain("mid", 6.0);
        let input = sine(1000.0, 4800);
        let output = equalizer.process(&input);
        let ratio = rms(mid(&output)) / rms(mid(&input));
        assert!(ratio > 3.0, "ratio was {ratio}");
    }

    #[test]
    fn test_mid_cut_notches_center_tone() {
        let mut equalizer = AudioEqualizer::new(RATE);
        equalizer.set_gain("mid", -6.0);
        let input = sine(1000.0, 4800);
        let output = equalizer.process(&input);
        let ratio = rms(mid(&output)) / rms(mid(&input));
        assert!(ratio < 0.2, "ratio was {ratio}");
    }

    #[test]
    fn test_sub_bass_filters_dc_when_armed() {
        let mut equalizer = AudioEqualizer::new(RATE);
        equalizer.set_gain("sub_bass", 1.0);
        let input = vec![1.0f32; 8192];
        let output = equalizer.process(&input);
        assert!(output[output.len() / 2].abs() < 0.01);
    }

    #[test]
    fn test_unknown_band_is_ignored() {
        let mut equalizer = AudioEqualizer::new(RATE);
        equalizer.set_gain("ultrasonic", 12.0);
        assert_eq!(equalizer.gain("ultrasonic"), None);
        let input = sine(440.0, 256);
        assert_eq!(equalizer.process(&input), input);
    }

    #[test]
    fn test_config_maps_onto_bands() {
        let config = EqualizerConfig {
            enabled: true,
            mid_gain: 3.0,
            air_gain: 1.0,
            ..EqualizerConfig::default()
        };
        let equalizer = AudioEqualizer::from_config(RATE, &config);
        assert_eq!(equalizer.gain("mid"), Some(3.0));
        assert_eq!(equalizer.gain("air"), Some(1.0));
        assert_eq!(equalizer.gain("bass"), Some(0.0));
    }
}
