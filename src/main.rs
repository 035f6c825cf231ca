mod audio;
mod config;
mod device;
mod dsp;
mod lifecycle;
mod protocol;
mod scanner;
mod signal;
mod store;

use crate::audio::{ClipEncoder, CpalMonitor, NullSink, PlaybackSink};
use crate::config::Config;
use crate::device::{SdrDevice, SimulatedSdr};
use crate::dsp::DspProcessor;
use crate::lifecycle::{CompletedTransmission, CompletionHandler, TransmissionLifecycle};
use crate::protocol::{NotificationSink, StdoutSink};
use crate::scanner::FrequencyScanScheduler;
use crate::store::{FieldMap, JsonlStore, RecordKind, RecordStore, StoreError};
use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bandscan")]
#[command(about = "Scanning SDR receiver that detects, cleans and records transmissions")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanner until interrupted
    Run {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Play cleaned audio through the default output device
        #[arg(long)]
        monitor: bool,

        /// Seed for the simulated SDR (random when omitted)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate a config file and print a summary
    Check {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a default config file
    Init {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the configured scan targets
    Targets {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List audio output devices available to the monitor
    Devices,
}

fn default_config_path() -> Result<PathBuf> {
    let base = directories::BaseDirs::new()
        .ok_or_else(|| anyhow!("Could not find home directory"))?;
    Ok(base.config_dir().join("bandscan").join("config.json"))
}

fn data_dir() -> Result<PathBuf> {
    let dir = directories::BaseDirs::new()
        .ok_or_else(|| anyhow!("Could not find data directory"))?
        .data_local_dir()
        .join("bandscan");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn recordings_dir(config: &Config) -> Result<PathBuf> {
    match &config.recording.directory {
        Some(dir) => Ok(dir.clone()),
        None => Ok(data_dir()?.join("recordings")),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(&path)?),
        None => {
            let path = default_config_path()?;
            if path.exists() {
                Ok(Config::load(&path)?)
            } else {
                eprintln!("No config at {}, using defaults", path.display());
                Ok(Config::default())
            }
        }
    }
}

/// Logs a one-line summary on stderr whenever a transmission closes.
struct CompletionLogger;

impl CompletionHandler for CompletionLogger {
    fn on_complete(&self, transmission: &CompletedTransmission) {
        let label = match &transmission.label {
            Some(label) => format!("{label} "),
            None => String::new(),
        };
        let clip = transmission
            .clip
            .as_ref()
            .map(|c| c.path.display().to_string())
            .unwrap_or_else(|| "no clip".to_string());
        eprintln!(
            "[{label}{:.3} MHz] {:.1}s peak {:.1} dBm avg {:.1} dBm ({}) -> {}",
            transmission.frequency_hz / 1e6,
            transmission.duration_secs,
            transmission.peak_dbm,
            transmission.average_dbm,
            transmission.reason.as_str(),
            clip
        );
    }
}

/// Record the scan list once; frequencies already on file are skipped.
fn register_targets(store: &dyn RecordStore, config: &Config) -> Result<(), StoreError> {
    let known: HashSet<u64> = store
        .query(RecordKind::ScanTarget)?
        .iter()
        .filter_map(|record| record.fields.get("frequency_hz").and_then(|v| v.as_f64()))
        .map(f64::to_bits)
        .collect();

    for target in &config.frequencies {
        if known.contains(&target.frequency.to_bits()) {
            continue;
        }
        let mut fields = FieldMap::new();
        fields.insert("frequency_hz".into(), target.frequency.into());
        fields.insert("modulation".into(), target.modulation.to_string().into());
        fields.insert("priority".into(), target.priority.into());
        fields.insert("enabled".into(), target.enabled.into());
        if let Some(label) = &target.label {
            fields.insert("label".into(), label.clone().into());
        }
        store.create(RecordKind::ScanTarget, Uuid::new_v4(), fields)?;
    }
    Ok(())
}

async fn run_scanner(config_path: Option<PathBuf>, monitor: bool, seed: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;

    let recordings = recordings_dir(&config)?;
    let store_path = data_dir()?.join("records.jsonl");

    let notifications: Arc<dyn NotificationSink> = Arc::new(StdoutSink);
    let store: Arc<dyn RecordStore> = Arc::new(JsonlStore::new(store_path.clone())?);
    let dsp = Arc::new(DspProcessor::new(config.audio.sample_rate, config.dsp.clone()));
    let encoder =
        ClipEncoder::new(recordings.clone(), &config.recording, config.audio.sample_rate)?;

    let playback: Arc<dyn PlaybackSink> = if monitor {
        match CpalMonitor::new(config.audio.sample_rate) {
            Ok(output) => Arc::new(output),
            Err(e) => {
                eprintln!("Monitor playback unavailable: {e}");
                Arc::new(NullSink)
            }
        }
    } else {
        Arc::new(NullSink)
    };

    if let Err(e) = register_targets(store.as_ref(), &config) {
        eprintln!("Failed to persist scan targets: {e}");
    }

    let lifecycle = Arc::new(TransmissionLifecycle::new(
        &config,
        dsp.clone(),
        encoder,
        playback,
        notifications.clone(),
        store,
        Some(Arc::new(CompletionLogger)),
    ));

    // the simulated device keys its transmission bursts to one frequency
    let burst_frequency = config
        .frequencies
        .iter()
        .find(|t| t.enabled)
        .map(|t| t.frequency)
        .unwrap_or(145_500_000.0);
    let device: Box<dyn SdrDevice> = Box::new(match seed {
        Some(seed) => SimulatedSdr::with_seed(burst_frequency, seed),
        None => SimulatedSdr::new(burst_frequency),
    });

    let scanner = FrequencyScanScheduler::new(&config, device, lifecycle.clone(), notifications);

    eprintln!("Starting bandscan");
    eprintln!(
        "Frequencies: {} configured, {} enabled",
        config.frequencies.len(),
        config.enabled_target_count()
    );
    eprintln!("Squelch: {} dBm", config.scanning.squelch_threshold);
    eprintln!("Recordings: {}", recordings.display());
    eprintln!("Records: {}", store_path.display());

    scanner.start();
    tokio::signal::ctrl_c().await?;

    eprintln!("Shutting down");
    scanner.stop().await;
    lifecycle.close_all();

    let summary = serde_json::json!({
        "scanner": scanner.status(),
        "frequencies": scanner.frequency_stats(),
        "dsp": dsp.stats(),
        "playback": lifecycle.playback_status(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&path)?;

    println!("Config OK: {}", path.display());
    println!(
        "  frequencies: {} configured, {} enabled",
        config.frequencies.len(),
        config.enabled_target_count()
    );
    println!("  squelch: {} dBm", config.scanning.squelch_threshold);
    println!(
        "  scan delay: {}s (min {}s, max {}s)",
        config.scanning.scan_delay,
        config.scanning.min_scan_delay,
        config.scanning.max_scan_delay
    );
    println!("  audio: {} Hz", config.audio.sample_rate);
    println!(
        "  dsp: gate={} noise_reduction={} equalizer={} agc={}",
        config.dsp.noise_gate.enabled,
        config.dsp.noise_reduction.enabled,
        config.dsp.equalizer.enabled,
        config.dsp.agc.enabled
    );
    Ok(())
}

fn init_config(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => default_config_path()?,
    };
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn list_targets(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    println!(
        "{:<12} {:<5} {:<9} {:<8} Label",
        "MHz", "Mod", "Priority", "Enabled"
    );
    println!("{}", "-".repeat(60));
    for target in &config.frequencies {
        println!(
            "{:<12.3} {:<5} {:<9} {:<8} {}",
            target.frequency / 1e6,
            target.modulation.to_string(),
            target.priority,
            if target.enabled { "YES" } else { "NO" },
            target.label.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn list_output_devices() -> Result<()> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    println!("Available Output Devices:");
    println!("{:<30} {:<10} Sample Rates", "Name", "Default");
    println!("{}", "-".repeat(60));

    for device in host.output_devices()? {
        let name = device.name().unwrap_or("Unknown Device".to_string());
        let default_str = if default_name.as_deref() == Some(name.as_str()) {
            "YES"
        } else {
            "NO"
        };
        let sample_rates = device
            .supported_output_configs()?
            .take(3)
            .map(|c| c.max_sample_rate().0.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        println!(
            "{:<30} {:<10} {}",
            &name[..name.len().min(30)],
            default_str,
            sample_rates
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            monitor,
            seed,
        } => {
            if let Err(e) = run_scanner(config, monitor, seed).await {
                eprintln!("Scanner failed: {}", e);
            }
        }

        Commands::Check { config } => {
            if let Err(e) = check_config(config) {
                eprintln!("Config check failed: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Init { config, force } => {
            if let Err(e) = init_config(config, force) {
                eprintln!("Init failed: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Targets { config } => {
            if let Err(e) = list_targets(config) {
                eprintln!("Failed to list targets: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Devices => {
            if let Err(e) = list_output_devices() {
                eprintln!("Failed to list audio devices: {}", e);
            }
        }
    }
}
