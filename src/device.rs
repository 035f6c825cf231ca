//! Sample acquisition. The scan loop only sees the `SdrDevice` trait;
//! the simulator below is the built-in implementation.

use std::f32::consts::PI;
use std::time::Instant;

use rustfft::num_complex::Complex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("failed to tune to {frequency_hz} Hz: {reason}")]
    Tune { frequency_hz: f64, reason: String },
}

/// A tunable receiver producing blocks of complex baseband samples.
pub trait SdrDevice: Send {
    fn set_center_frequency(&mut self, frequency_hz: f64) -> Result<(), DeviceError>;

    fn read_iq_block(&mut self, len: usize) -> Result<Vec<Complex<f32>>, DeviceError>;

    /// Whether the hardware needs time to settle after a retune.
    fn needs_settle(&self) -> bool {
        true
    }
}

/// Synthetic receiver: Gaussian noise everywhere, plus a periodic burst
/// on one frequency so detections fire without hardware. The burst is
/// active for the first two seconds of every thirty-second window.
pub struct SimulatedSdr {
    rng: fastrand::Rng,
    burst_frequency_hz: f64,
    tuned_hz: f64,
    started: Instant,
}

const QUIET_SIGMA: f32 = 0.05;
const BURST_SIGMA: f32 = 0.5;
const BURST_PERIOD_SECS: u64 = 30;
const BURST_LENGTH_SECS: u64 = 2;

impl SimulatedSdr {
    pub fn new(burst_frequency_hz: f64) -> Self {
        Self::with_seed(burst_frequency_hz, fastrand::u64(..))
    }

    /// Deterministic variant for repeatable runs.
    pub fn with_seed(burst_frequency_hz: f64, seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            burst_frequency_hz,
            tuned_hz: 0.0,
            started: Instant::now(),
        }
    }

    fn burst_active(&self) -> bool {
        self.tuned_hz == self.burst_frequency_hz
            && self.started.elapsed().as_secs() % BURST_PERIOD_SECS < BURST_LENGTH_SECS
    }

    /// Box-Muller transform over two uniform draws.
    fn gaussian(&mut self, sigma: f32) -> f32 {
        let u1 = self.rng.f32().max(f32::MIN_POSITIVE);
        let u2 = self.rng.f32();
        sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

impl SdrDevice for SimulatedSdr {
    fn set_center_frequency(&mut self, frequency_hz: f64) -> Result<(), DeviceError> {
        if frequency_hz <= 0.0 {
            return Err(DeviceError::Tune {
                frequency_hz,
                reason: "frequency must be positive".to_string(),
            });
        }
        self.tuned_hz = frequency_hz;
        Ok(())
    }

    fn read_iq_block(&mut self, len: usize) -> Result<Vec<Complex<f32>>, DeviceError> {
        let burst = self.burst_active();
        let mut block = Vec::with_capacity(len);
        for _ in 0..len {
            let mut sample = Complex::new(
                self.gaussian(QUIET_SIGMA),
                self.gaussian(QUIET_SIGMA),
            );
            if burst {
                sample += Complex::new(self.gaussian(BURST_SIGMA), self.gaussian(BURST_SIGMA));
            }
            block.push(sample);
        }
        Ok(block)
    }

    fn needs_settle(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;

    #[test]
    fn test_rejects_nonpositive_frequency() {
        let mut sdr = SimulatedSdr::with_seed(118_000_000.0, 7);
        assert!(matches!(
            sdr.set_center_frequency(0.0),
            Err(DeviceError::Tune { .. })
        ));
    }

    #[test]
    fn test_block_length() {
        let mut sdr = SimulatedSdr::with_seed(118_000_000.0, 7);
        sdr.set_center_frequency(118_000_000.0).unwrap();
        let block = sdr.read_iq_block(8192).unwrap();
        assert_eq!(block.len(), 8192);
    }

    #[test]
    fn test_same_seed_same_samples() {
        let mut a = SimulatedSdr::with_seed(118_000_000.0, 42);
        let mut b = SimulatedSdr::with_seed(118_000_000.0, 42);
        a.set_center_frequency(146_000_000.0).unwrap();
        b.set_center_frequency(146_000_000.0).unwrap();
        assert_eq!(a.read_iq_block(64).unwrap(), b.read_iq_block(64).unwrap());
    }

    #[test]
    fn test_burst_frequency_is_louder() {
        // reads happen well inside the two-second burst window
        let mut sdr = SimulatedSdr::with_seed(118_000_000.0, 42);

        sdr.set_center_frequency(462_000_000.0).unwrap();
        let quiet = signal::calculate_power(&sdr.read_iq_block(8192).unwrap());

        sdr.set_center_frequency(118_000_000.0).unwrap();
        let loud = signal::calculate_power(&sdr.read_iq_block(8192).unwrap());

        assert!(quiet < -50.0, "quiet floor was {quiet}");
        assert!(loud > -40.0, "burst power was {loud}");
        assert!(loud > quiet + 10.0);
    }

    #[test]
    fn test_simulator_needs_no_settle() {
        let sdr = SimulatedSdr::with_seed(118_000_000.0, 7);
        assert!(!sdr.needs_settle());
    }
}
