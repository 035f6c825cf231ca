use super::{EnvelopeFollower, time_coefficient};

/// Levels audio toward a target loudness. The applied gain is clamped
/// between -60 dB and the configured maximum, and changes no faster
/// than the attack and release times allow.
pub struct AutomaticGainControl {
    target_db: f32,
    max_gain_db: f32,
    attack: f32,
    release: f32,
    envelope: EnvelopeFollower,
    gain: f32,
}

const MIN_GAIN_DB: f32 = -60.0;
const ENVELOPE_FLOOR: f32 = 1e-10;

impl AutomaticGainControl {
    pub fn new(
        target_db: f64,
        attack_secs: f64,
        release_secs: f64,
        max_gain_db: f64,
        sample_rate: u32,
    ) -> Self {
        Self {
            target_db: target_db as f32,
            max_gain_db: max_gain_db as f32,
            attack: time_coefficient(attack_secs, sample_rate),
            release: time_coefficient(release_secs, sample_rate),
            envelope: EnvelopeFollower::new(attack_secs, release_secs, sample_rate),
            gain: 1.0,
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut output = Vec::with_capacity(samples.len());
        for &sample in samples {
            let envelope = self.envelope.track(sample.abs());
            let envelope_db = if envelope > ENVELOPE_FLOOR {
                20.0 * envelope.log10()
            } else {
                -100.0
            };

            let required_db = (self.target_db - envelope_db).clamp(MIN_GAIN_DB, self.max_gain_db);
            let target_gain = 10.0f32.powf(required_db / 20.0);
            let coeff = if target_gain > self.gain {
                self.attack
            } else {
                self.release
            };
            self.gain = target_gain + coeff * (self.gain - target_gain);

            output.push(sample * self.gain);
        }
        output
    }

    #[cfg(test)]
    fn gain(&self) -> f32 {
        self.gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;

    fn agc() -> AutomaticGainControl {
        AutomaticGainControl::new(-20.0, 0.003, 0.1, 40.0, RATE)
    }

    #[test]
    fn test_gain_stays_within_bounds() {
        let mut agc = agc();
        let min_gain = 10.0f32.powf(MIN_GAIN_DB / 20.0);
        let max_gain = 10.0f32.powf(40.0 / 20.0);

        let mut input = Vec::new();
        input.extend(vec![0.001f32; 4000]);
        input.extend(vec![1.0f32; 4000]);
        input.extend(vec![0.0001f32; 4000]);

        let output = agc.process(&input);
        for (out, inp) in output.iter().zip(&input) {
            let applied = out / inp;
            assert!(applied >= min_gain - 1e-4 && applied <= max_gain + 1e-4);
        }
    }

    #[test]
    fn test_loud_input_is_pulled_down() {
        let mut agc = agc();
        // 0 dB input against a -20 dB target wants a 0.1 gain
        let output = agc.process(&vec![1.0; 48_000]);
        assert!((agc.gain() - 0.1).abs() < 0.01);
        assert!((output.last().unwrap() - 0.1).abs() < 0.01);
    }

    #[test]
    fn test_quiet_input_is_boosted() {
        let mut agc = agc();
        // -60 dB input wants +40 dB, exactly the gain ceiling
        let output = agc.process(&vec![0.001; 10_000]);
        assert!(agc.gain() > 50.0);
        assert!(agc.gain() <= 100.0 + 1e-3);
        let leveled = output.last().unwrap();
        assert!((leveled - 0.1).abs() < 0.02);
    }

    #[test]
    fn test_silence_passes_through() {
        let mut agc = agc();
        let output = agc.process(&vec![0.0; 1024]);
        assert!(output.iter().all(|s| *s == 0.0));
    }
}
