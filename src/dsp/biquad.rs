use std::f32::consts::PI;

/// Second-order filter coefficients, normalized so a0 == 1.
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoeffs {
    pub fn lowpass(freq_hz: f32, q: f32, sample_rate: f32) -> Self {
        let (sin_w0, cos_w0) = omega(freq_hz, sample_rate);
        let alpha = sin_w0 / (2.0 * q);
        let b1 = 1.0 - cos_w0;
        Self::normalize(
            [b1 / 2.0, b1, b1 / 2.0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    pub fn highpass(freq_hz: f32, q: f32, sample_rate: f32) -> Self {
        let (sin_w0, cos_w0) = omega(freq_hz, sample_rate);
        let alpha = sin_w0 / (2.0 * q);
        let b0 = (1.0 + cos_w0) / 2.0;
        Self::normalize(
            [b0, -(1.0 + cos_w0), b0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    /// Boost of `gain_db` centered at `freq_hz`, unity elsewhere.
    pub fn peaking(freq_hz: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0f32.powf(gain_db / 40.0);
        let (sin_w0, cos_w0) = omega(freq_hz, sample_rate);
        let alpha = sin_w0 / (2.0 * q);
        Self::normalize(
            [1.0 + alpha * a, -2.0 * cos_w0, 1.0 - alpha * a],
            [1.0 + alpha / a, -2.0 * cos_w0, 1.0 - alpha / a],
        )
    }

    /// Narrow rejection at `freq_hz`.
    pub fn notch(freq_hz: f32, q: f32, sample_rate: f32) -> Self {
        let (sin_w0, cos_w0) = omega(freq_hz, sample_rate);
        let alpha = sin_w0 / (2.0 * q);
        Self::normalize(
            [1.0, -2.0 * cos_w0, 1.0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    fn normalize(b: [f32; 3], a: [f32; 3]) -> Self {
        Self {
            b0: b[0] / a[0],
            b1: b[1] / a[0],
            b2: b[2] / a[0],
            a1: a[1] / a[0],
            a2: a[2] / a[0],
        }
    }
}

fn omega(freq_hz: f32, sample_rate: f32) -> (f32, f32) {
    let w0 = 2.0 * PI * freq_hz / sample_rate;
    (w0.sin(), w0.cos())
}

/// Direct form II transposed biquad.
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    z0: f32,
    z1: f32,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z0: 0.0,
            z1: 0.0,
        }
    }

    pub fn process_sample(&mut self, input: f32) -> f32 {
        let c = self.coeffs;
        let output = c.b0 * input + self.z0;
        self.z0 = c.b1 * input - c.a1 * output + self.z1;
        self.z1 = c.b2 * input - c.a2 * output;
        output
    }
}

/// Zero-phase run: filter forward, then backward, each pass with
/// fresh state. The magnitude response applies twice.
pub fn filtfilt(coeffs: BiquadCoeffs, samples: &[f32]) -> Vec<f32> {
    let mut forward = Biquad::new(coeffs);
    let mut output: Vec<f32> = samples
        .iter()
        .map(|&sample| forward.process_sample(sample))
        .collect();

    output.reverse();
    let mut backward = Biquad::new(coeffs);
    for sample in output.iter_mut() {
        *sample = backward.process_sample(*sample);
    }
    output.reverse();
    output
}
