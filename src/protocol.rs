use std::path::PathBuf;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Modulation;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Events published while scanning
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScannerEvent {
    /// Power reading taken on a frequency during a scan cycle
    SignalStrength {
        frequency: f64,
        signal_strength: f64,
        timestamp: Timestamp,
    },
    /// A transmission rose above the squelch threshold
    TransmissionStart {
        id: Uuid,
        frequency: f64,
        signal_strength: f64,
        modulation: Modulation,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        timestamp: Timestamp,
    },
    /// A transmission closed and its clip (if any) was written
    TransmissionEnd {
        id: Uuid,
        frequency: f64,
        duration: f64,
        peak_signal_strength: f64,
        average_signal_strength: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        clip_path: Option<PathBuf>,
        timestamp: Timestamp,
    },
}

impl ScannerEvent {
    /// Create a signal strength update
    pub fn new_signal_strength(frequency: f64, signal_strength: f64) -> Self {
        ScannerEvent::SignalStrength {
            frequency,
            signal_strength,
            timestamp: Timestamp::now(),
        }
    }

    /// Create a transmission start event
    pub fn new_transmission_start(
        id: Uuid,
        frequency: f64,
        signal_strength: f64,
        modulation: Modulation,
        label: Option<String>,
    ) -> Self {
        ScannerEvent::TransmissionStart {
            id,
            frequency,
            signal_strength,
            modulation,
            label,
            timestamp: Timestamp::now(),
        }
    }

    /// Create a transmission end event
    pub fn new_transmission_end(
        id: Uuid,
        frequency: f64,
        duration: f64,
        peak_signal_strength: f64,
        average_signal_strength: f64,
        clip_path: Option<PathBuf>,
    ) -> Self {
        ScannerEvent::TransmissionEnd {
            id,
            frequency,
            duration,
            peak_signal_strength,
            average_signal_strength,
            clip_path,
            timestamp: Timestamp::now(),
        }
    }
}

/// Receives scanner events. Delivery failures are the caller's to log;
/// they never interrupt scanning.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &ScannerEvent) -> Result<(), NotifyError>;
}

/// Default sink: one JSON line per event on stdout
pub struct StdoutSink;

impl NotificationSink for StdoutSink {
    fn notify(&self, event: &ScannerEvent) -> Result<(), NotifyError> {
        let line = serde_json::to_string(event)?;
        println!("{line}");
        Ok(())
    }
}
