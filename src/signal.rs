//! Signal strength measurement and demodulation for complex IQ blocks.

use rustfft::num_complex::Complex;

/// Reported when a block is empty or carries no measurable energy.
pub const NOISE_FLOOR_DBM: f64 = -100.0;

/// Mean power of an IQ block in dBm (10 * log10(mean |s|^2), shifted from mW).
pub fn calculate_power(samples: &[Complex<f32>]) -> f64 {
    if samples.is_empty() {
        return NOISE_FLOOR_DBM;
    }

    let mean_power = samples
        .iter()
        .map(|s| f64::from(s.norm_sqr()))
        .sum::<f64>()
        / samples.len() as f64;

    if mean_power <= 0.0 {
        return NOISE_FLOOR_DBM;
    }

    10.0 * mean_power.log10() - 30.0
}

/// True when the block's power is strictly above the squelch threshold.
pub fn detect_transmission(samples: &[Complex<f32>], threshold_dbm: f64) -> bool {
    calculate_power(samples) > threshold_dbm
}

/// FM discriminator: phase difference between consecutive samples,
/// normalized to a +/-0.5 audio range. Blocks shorter than two samples
/// carry no phase slope and demodulate to nothing.
pub fn demodulate_fm(samples: &[Complex<f32>]) -> Vec<f32> {
    if samples.len() < 2 {
        return Vec::new();
    }

    let mut audio: Vec<f32> = samples
        .windows(2)
        .map(|pair| (pair[1] * pair[0].conj()).arg())
        .collect();

    scale_to_half_range(&mut audio);
    audio
}

/// AM envelope detector: magnitude with the DC carrier removed,
/// normalized to a +/-0.5 audio range.
pub fn demodulate_am(samples: &[Complex<f32>]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut audio: Vec<f32> = samples.iter().map(|s| s.norm()).collect();
    let mean = audio.iter().sum::<f32>() / audio.len() as f32;
    for sample in &mut audio {
        *sample -= mean;
    }

    scale_to_half_range(&mut audio);
    audio
}

fn scale_to_half_range(audio: &mut [f32]) {
    let peak = audio.iter().fold(0.0f32, |max, s| max.max(s.abs()));
    if peak > 0.0 {
        for sample in audio.iter_mut() {
            *sample = *sample / peak * 0.5;
        }
    }
}
