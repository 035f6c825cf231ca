use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modulation {
    Am,
    Fm,
}

impl Modulation {
    /// Band plan default: the aviation band is AM, everything else FM.
    pub fn for_frequency(frequency_hz: f64) -> Self {
        if (118_000_000.0..137_000_000.0).contains(&frequency_hz) {
            Modulation::Am
        } else {
            Modulation::Fm
        }
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modulation::Am => write!(f, "AM"),
            Modulation::Fm => write!(f, "FM"),
        }
    }
}

/// One frequency in the scan list, identified by its frequency in Hz.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanTarget {
    pub frequency: f64,
    pub modulation: Modulation,
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdrConfig {
    pub device_index: u32,
    pub sample_rate: u32,
    pub gain: f64,
}

impl Default for SdrConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: 2_048_000,
            gain: 49.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanningConfig {
    /// Base pause between scan cycles, in seconds.
    pub scan_delay: f64,
    pub min_scan_delay: f64,
    pub max_scan_delay: f64,
    /// Power above this is treated as an active transmission, in dBm.
    pub squelch_threshold: f64,
    /// Seconds of continuous silence before an open transmission closes.
    pub transmission_timeout: f64,
    /// Consecutive quiet scans before a frequency is skipped.
    pub quiet_threshold: u32,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            scan_delay: 0.1,
            min_scan_delay: 0.05,
            max_scan_delay: 2.0,
            squelch_threshold: -50.0,
            transmission_timeout: 5.0,
            quiet_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Weighted,
    RoundRobin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriorityConfig {
    pub enabled: bool,
    /// Weight multiplier earned by the highest-priority target.
    pub multiplier: f64,
    /// Weight floor for priority-zero targets.
    pub min_weight: f64,
    pub scan_mode: ScanMode,
    /// Upper bound on the boost given to under-scanned targets.
    pub fairness_boost_cap: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multiplier: 2.0,
            min_weight: 0.5,
            scan_mode: ScanMode::Weighted,
            fairness_boost_cap: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoiseGateConfig {
    pub enabled: bool,
    pub threshold_db: f64,
    pub attack_time: f64,
    pub release_time: f64,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_db: -40.0,
            attack_time: 0.001,
            release_time: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgcConfig {
    pub enabled: bool,
    pub target_level_db: f64,
    pub attack_time: f64,
    pub release_time: f64,
    pub max_gain_db: f64,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_level_db: -20.0,
            attack_time: 0.003,
            release_time: 0.1,
            max_gain_db: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoiseReductionConfig {
    pub enabled: bool,
    /// Over-subtraction factor, 1.0 (gentle) to 3.0 (aggressive).
    pub alpha: f64,
    pub frame_size: usize,
}

impl Default for NoiseReductionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: 2.0,
            frame_size: 1024,
        }
    }
}

/// Per-band gains in dB. The sub-bass and air bands act as rumble and
/// hiss filters whose gain value only switches them on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EqualizerConfig {
    pub enabled: bool,
    pub sub_bass_gain: f64,
    pub bass_gain: f64,
    pub low_mid_gain: f64,
    pub mid_gain: f64,
    pub high_mid_gain: f64,
    pub presence_gain: f64,
    pub brilliance_gain: f64,
    pub air_gain: f64,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sub_bass_gain: 0.0,
            bass_gain: 0.0,
            low_mid_gain: 0.0,
            mid_gain: 0.0,
            high_mid_gain: 0.0,
            presence_gain: 0.0,
            brilliance_gain: 0.0,
            air_gain: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DspConfig {
    pub noise_gate: NoiseGateConfig,
    pub agc: AgcConfig,
    pub noise_reduction: NoiseReductionConfig,
    pub equalizer: EqualizerConfig,
}

impl DspConfig {
    pub fn any_stage_enabled(&self) -> bool {
        self.noise_gate.enabled
            || self.agc.enabled
            || self.noise_reduction.enabled
            || self.equalizer.enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    Wav,
    Mp3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordingConfig {
    /// Clip directory. Defaults to the user data dir when unset.
    pub directory: Option<PathBuf>,
    pub format: RecordingFormat,
    pub mp3_bitrate: String,
    /// Hard cap on buffered clip length, in seconds.
    pub max_duration: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: RecordingFormat::Wav,
            mp3_bitrate: "192k".to_string(),
            max_duration: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sdr: SdrConfig,
    pub audio: AudioConfig,
    pub scanning: ScanningConfig,
    pub priority: PriorityConfig,
    pub dsp: DspConfig,
    pub recording: RecordingConfig,
    pub frequencies: Vec<ScanTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sdr: SdrConfig::default(),
            audio: AudioConfig::default(),
            scanning: ScanningConfig::default(),
            priority: PriorityConfig::default(),
            dsp: DspConfig::default(),
            recording: RecordingConfig::default(),
            frequencies: default_targets(),
        }
    }
}

fn default_true() -> bool {
    true
}

const VALID_BITRATES: [&str; 4] = ["128k", "192k", "256k", "320k"];

/// Starter scan list covering the airband, two amateur calling
/// frequencies and two public-service channels.
pub fn default_targets() -> Vec<ScanTarget> {
    [
        118_000_000.0,
        121_500_000.0,
        122_800_000.0,
        145_500_000.0,
        446_000_000.0,
        155_160_000.0,
        162_550_000.0,
    ]
    .iter()
    .map(|&frequency| ScanTarget {
        frequency,
        modulation: Modulation::for_frequency(frequency),
        priority: 0,
        enabled: true,
        label: Some(band_label(frequency).to_string()),
    })
    .collect()
}

fn band_label(frequency_hz: f64) -> &'static str {
    if (118_000_000.0..137_000_000.0).contains(&frequency_hz) {
        "Aviation"
    } else if (144_000_000.0..148_000_000.0).contains(&frequency_hz)
        || (420_000_000.0..450_000_000.0).contains(&frequency_hz)
    {
        "Amateur Radio"
    } else {
        "General"
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(text)?;
        if config.frequencies.is_empty() {
            config.frequencies = default_targets();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.sdr.sample_rate == 0 {
            return invalid("sdr.sample_rate must be positive".to_string());
        }
        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate must be positive".to_string());
        }

        let scanning = &self.scanning;
        if scanning.scan_delay <= 0.0
            || scanning.min_scan_delay <= 0.0
            || scanning.max_scan_delay <= 0.0
        {
            return invalid("scan delays must be positive".to_string());
        }
        if scanning.min_scan_delay > scanning.max_scan_delay {
            return invalid(format!(
                "min_scan_delay {} exceeds max_scan_delay {}",
                scanning.min_scan_delay, scanning.max_scan_delay
            ));
        }
        if scanning.transmission_timeout <= 0.0 {
            return invalid("transmission_timeout must be positive".to_string());
        }

        let priority = &self.priority;
        if !(1.0..=10.0).contains(&priority.multiplier) {
            return invalid(format!(
                "priority.multiplier must be between 1.0 and 10.0, got {}",
                priority.multiplier
            ));
        }
        if priority.min_weight <= 0.0 || priority.min_weight > 1.0 {
            return invalid(format!(
                "priority.min_weight must be in (0.0, 1.0], got {}",
                priority.min_weight
            ));
        }
        if priority.fairness_boost_cap < 1.0 {
            return invalid(format!(
                "priority.fairness_boost_cap must be at least 1.0, got {}",
                priority.fairness_boost_cap
            ));
        }

        let reduction = &self.dsp.noise_reduction;
        if !(1.0..=3.0).contains(&reduction.alpha) {
            return invalid(format!(
                "noise_reduction.alpha must be between 1.0 and 3.0, got {}",
                reduction.alpha
            ));
        }
        if reduction.frame_size == 0 || reduction.frame_size % 2 != 0 {
            return invalid(format!(
                "noise_reduction.frame_size must be a positive even number, got {}",
                reduction.frame_size
            ));
        }

        if !VALID_BITRATES.contains(&self.recording.mp3_bitrate.as_str()) {
            return invalid(format!(
                "recording.mp3_bitrate must be one of {:?}, got {}",
                VALID_BITRATES, self.recording.mp3_bitrate
            ));
        }
        if self.recording.max_duration <= 0.0 {
            return invalid("recording.max_duration must be positive".to_string());
        }

        for target in &self.frequencies {
            if target.frequency <= 0.0 {
                return invalid(format!("frequency {} must be positive", target.frequency));
            }
            if target.priority > 100 {
                return invalid(format!(
                    "priority for {} Hz must be 0-100, got {}",
                    target.frequency, target.priority
                ));
            }
        }
        for (i, target) in self.frequencies.iter().enumerate() {
            if self.frequencies[..i]
                .iter()
                .any(|other| other.frequency == target.frequency)
            {
                return invalid(format!("duplicate frequency {} Hz", target.frequency));
            }
        }

        Ok(())
    }

    pub fn enabled_target_count(&self) -> usize {
        self.frequencies.iter().filter(|t| t.enabled).count()
    }
}
