use super::EnvelopeFollower;

/// Mutes audio whose envelope sits below the threshold. Opens above
/// the threshold and only closes 6 dB lower, so it won't chatter on
/// signals hovering near the edge.
pub struct NoiseGate {
    threshold_db: f32,
    envelope: EnvelopeFollower,
    open: bool,
}

const HYSTERESIS_DB: f32 = 6.0;
const ENVELOPE_FLOOR: f32 = 1e-10;

impl NoiseGate {
    pub fn new(threshold_db: f64, attack_secs: f64, release_secs: f64, sample_rate: u32) -> Self {
        Self {
            threshold_db: threshold_db as f32,
            envelope: EnvelopeFollower::new(attack_secs, release_secs, sample_rate),
            open: false,
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let close_below = self.threshold_db - HYSTERESIS_DB;
        let mut output = Vec::with_capacity(samples.len());
        for &sample in samples {
            let envelope = self.envelope.track(sample.abs());
            let envelope_db = 20.0 * (envelope + ENVELOPE_FLOOR).log10();
            if envelope_db > self.threshold_db {
                self.open = true;
            } else if envelope_db < close_below {
                self.open = false;
            }
            output.push(if self.open { sample } else { 0.0 });
        }
        output
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.open
    }
}
