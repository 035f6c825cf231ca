//! Spectral subtraction noise reduction. The first frames seed a noise
//! profile; later frames subtract a scaled copy of it from their
//! magnitude spectrum, keeping phase, and overlap-add back to time.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

pub struct SpectralNoiseReduction {
    frame_size: usize,
    hop_size: usize,
    alpha: f32,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    noise_magnitude: Option<Vec<f32>>,
    frames_seen: usize,
    pending: VecDeque<f32>,
    ready: VecDeque<f32>,
    overlap: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

const NOISE_LEARN_FRAMES: usize = 10;
const NOISE_UPDATE_RATE: f32 = 0.05;
const GAIN_FLOOR: f32 = 0.1;
const MAGNITUDE_FLOOR: f32 = 1e-10;

impl SpectralNoiseReduction {
    /// `frame_size` must be even; frames advance by half a frame.
    pub fn new(frame_size: usize, alpha: f64) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            frame_size,
            hop_size: frame_size / 2,
            alpha: alpha as f32,
            window: hann_window(frame_size),
            forward: planner.plan_fft_forward(frame_size),
            inverse: planner.plan_fft_inverse(frame_size),
            noise_magnitude: None,
            frames_seen: 0,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            overlap: vec![0.0; frame_size * 2],
            scratch: vec![Complex::new(0.0, 0.0); frame_size],
        }
    }

    /// Streaming: output always matches the input length. Samples
    /// still sitting inside a partial frame are padded out with
    /// silence and delivered on a later call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend(samples.iter().copied());

        while self.pending.len() >= self.frame_size {
            let enhanced = self.enhance_frame();
            for (acc, sample) in self.overlap.iter_mut().zip(enhanced) {
                *acc += sample;
            }
            self.ready
                .extend(self.overlap.iter().take(self.hop_size).copied());

            self.pending.drain(..self.hop_size);
            self.overlap.copy_within(self.hop_size.., 0);
            let tail = self.overlap.len() - self.hop_size;
            self.overlap[tail..].fill(0.0);
        }

        let mut output = vec![0.0f32; samples.len()];
        for slot in output.iter_mut() {
            match self.ready.pop_front() {
                Some(sample) => *slot = sample,
                None => break,
            }
        }
        output
    }

    fn enhance_frame(&mut self) -> Vec<f32> {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            *slot = Complex::new(self.pending[i] * self.window[i], 0.0);
        }
        self.forward.process(&mut self.scratch);

        let magnitudes: Vec<f32> = self.scratch.iter().map(|bin| bin.norm()).collect();
        match &mut self.noise_magnitude {
            None => self.noise_magnitude = Some(magnitudes.clone()),
            Some(noise) if self.frames_seen < NOISE_LEARN_FRAMES => {
                for (estimate, magnitude) in noise.iter_mut().zip(&magnitudes) {
                    *estimate =
                        (1.0 - NOISE_UPDATE_RATE) * *estimate + NOISE_UPDATE_RATE * magnitude;
                }
            }
            Some(_) => {}
        }
        self.frames_seen += 1;

        if let Some(noise) = &self.noise_magnitude {
            for ((bin, &magnitude), &noise_magnitude) in
                self.scratch.iter_mut().zip(&magnitudes).zip(noise)
            {
                let gain = (1.0 - self.alpha * noise_magnitude / magnitude.max(MAGNITUDE_FLOOR))
                    .max(GAIN_FLOOR);
                *bin *= gain;
            }
        }

        self.inverse.process(&mut self.scratch);
        let scale = 1.0 / self.frame_size as f32;
        self.scratch
            .iter()
            .zip(&self.window)
            .map(|(bin, w)| bin.re * scale * w)
            .collect()
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    let denominator = (len - 1).max(1) as f32;
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / denominator;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    fn noise_block(rng: &mut fastrand::Rng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.f32() * 2.0 - 1.0).collect()
    }

    #[test]
    fn test_output_length_matches_streamed_input() {
        let mut reduction = SpectralNoiseReduction::new(256, 2.0);
        for len in [100, 300, 50, 1000] {
            let input = vec![0.25f32; len];
            assert_eq!(reduction.process(&input).len(), len);
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut reduction = SpectralNoiseReduction::new(256, 2.0);
        let output = reduction.process(&vec![0.0; 2048]);
        assert!(output.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_steady_noise_is_attenuated() {
        let mut reduction = SpectralNoiseReduction::new(256, 2.0);
        let mut rng = fastrand::Rng::with_seed(9);

        // warm-up fills the noise profile
        reduction.process(&noise_block(&mut rng, 4096));

        let input = noise_block(&mut rng, 4096);
        let output = reduction.process(&input);
        assert!(rms(&output) < 0.5 * rms(&input));
    }

    #[test]
    fn test_chunked_stream_drops_nothing() {
        let mut rng = fastrand::Rng::with_seed(3);
        let stream = noise_block(&mut rng, 1500);

        let mut whole = SpectralNoiseReduction::new(256, 2.0);
        let single = whole.process(&stream);

        let mut chunked = SpectralNoiseReduction::new(256, 2.0);
        let mut pieces = Vec::new();
        for chunk in [
            &stream[..100],
            &stream[100..400],
            &stream[400..450],
            &stream[450..],
        ] {
            pieces.extend(chunked.process(chunk));
        }

        let energy = |s: &[f32]| s.iter().map(|x| x.abs() as f64).sum::<f64>();
        assert_eq!(pieces.len(), single.len());
        assert!((energy(&pieces) - energy(&single)).abs() < 1e-3);
    }

    #[test]
    fn test_empty_input() {
        let mut reduction = SpectralNoiseReduction::new(256, 2.0);
        assert!(reduction.process(&[]).is_empty());
        // a short feed leaves a partial frame pending without stalling
        assert_eq!(reduction.process(&[0.1; 10]).len(), 10);
        assert!(reduction.process(&[]).is_empty());
    }

    #[test]
    fn test_hann_window_shape() {
        let window = hann_window(256);
        assert!(window[0].abs() < 1e-6);
        assert!((window[127] - 1.0).abs() < 1e-3);
        assert!(window[255].abs() < 1e-6);
    }
}
