use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use hound::{WavSpec, WavWriter};
use jiff::Timestamp;
use jiff::tz::TimeZone;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{RecordingConfig, RecordingFormat};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("no samples to encode")]
    Empty,
    #[error("failed to write wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("failed to write clip files: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize clip metadata: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the lifecycle knows about a finished transmission.
#[derive(Debug, Clone)]
pub struct ClipInfo {
    pub id: Uuid,
    pub frequency_hz: f64,
    pub started_at: Timestamp,
    pub duration_secs: f64,
    pub peak_dbm: f64,
    pub average_dbm: f64,
}

#[derive(Debug, Clone)]
pub struct EncodedClip {
    pub path: PathBuf,
    pub metadata_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Serialize)]
struct ClipMetadata {
    id: Uuid,
    filename: String,
    format: RecordingFormat,
    frequency_hz: f64,
    frequency_mhz: f64,
    started_at: Timestamp,
    duration_seconds: f64,
    sample_rate: u32,
    channels: u16,
    bit_depth: u16,
    sample_count: usize,
    peak_signal_strength_dbm: f64,
    average_signal_strength_dbm: f64,
    max_amplitude: f32,
    rms_level: f32,
    file_size_bytes: u64,
}

/// Writes finished clips plus a JSON sidecar describing them. Only WAV
/// output is built in; an MP3 request downgrades with a single warning.
pub struct ClipEncoder {
    directory: PathBuf,
    format: RecordingFormat,
    sample_rate: u32,
    fallback_logged: AtomicBool,
}

const LOW_DISK_BYTES: u64 = 100 * 1024 * 1024;

impl ClipEncoder {
    pub fn new(
        directory: PathBuf,
        config: &RecordingConfig,
        sample_rate: u32,
    ) -> Result<Self, EncodeError> {
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            format: config.format,
            sample_rate,
            fallback_logged: AtomicBool::new(false),
        })
    }

    pub fn encode(&self, samples: &[f32], info: &ClipInfo) -> Result<EncodedClip, EncodeError> {
        if samples.is_empty() {
            return Err(EncodeError::Empty);
        }

        if self.format == RecordingFormat::Mp3 && !self.fallback_logged.swap(true, Ordering::SeqCst)
        {
            eprintln!("mp3 encoding is not available, falling back to wav");
        }

        if let Ok(available) = fs2::available_space(&self.directory)
            && available < LOW_DISK_BYTES
        {
            eprintln!(
                "low disk space in {}: {} MB left",
                self.directory.display(),
                available / (1024 * 1024)
            );
        }

        let base = self.file_base(info);
        let audio_path = self.directory.join(format!("{base}.wav"));
        let metadata_path = self.directory.join(format!("{base}.json"));

        let prepared = prepare_for_encoding(samples);

        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&audio_path, spec)?;
        for &sample in &prepared {
            writer.write_sample((sample * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;

        let size_bytes = fs::metadata(&audio_path)?.len();

        let max_amplitude = prepared.iter().fold(0.0f32, |max, s| max.max(s.abs()));
        let rms_level = (prepared.iter().map(|s| s * s).sum::<f32>()
            / prepared.len() as f32)
            .sqrt();

        let metadata = ClipMetadata {
            id: info.id,
            filename: format!("{base}.wav"),
            format: RecordingFormat::Wav,
            frequency_hz: info.frequency_hz,
            frequency_mhz: info.frequency_hz / 1e6,
            started_at: info.started_at,
            duration_seconds: info.duration_secs,
            sample_rate: self.sample_rate,
            channels: 1,
            bit_depth: 16,
            sample_count: prepared.len(),
            peak_signal_strength_dbm: info.peak_dbm,
            average_signal_strength_dbm: info.average_dbm,
            max_amplitude,
            rms_level,
            file_size_bytes: size_bytes,
        };
        fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        Ok(EncodedClip {
            path: audio_path,
            metadata_path,
            size_bytes,
        })
    }

    fn file_base(&self, info: &ClipInfo) -> String {
        let stamp = info
            .started_at
            .to_zoned(TimeZone::system())
            .strftime("%Y-%m-%d_%H-%M-%S")
            .to_string();
        format!("{stamp}_{:.3}MHz", info.frequency_hz / 1e6)
    }
}

/// Normalize to a 0.9 peak, then take the first difference to knock
/// out any DC offset left by demodulation.
fn prepare_for_encoding(samples: &[f32]) -> Vec<f32> {
    let mut audio = samples.to_vec();

    let peak = audio.iter().fold(0.0f32, |max, s| max.max(s.abs()));
    if peak > 0.0 {
        for sample in &mut audio {
            *sample = *sample / peak * 0.9;
        }
    }

    if audio.len() > 1 {
        let mut previous = 0.0;
        for sample in &mut audio {
            let current = *sample;
            *sample = current - previous;
            previous = current;
        }
    }
    audio
}
