use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use jiff::Timestamp;
use serde::Serialize;
use uuid::Uuid;

use crate::audio::{AudioBuffer, ClipEncoder, ClipInfo, EncodedClip, PlaybackError, PlaybackSink};
use crate::config::{Config, ScanTarget};
use crate::dsp::DspProcessor;
use crate::protocol::{NotificationSink, ScannerEvent};
use crate::store::{FieldMap, RecordKind, RecordStore};

/// Transmissions are force-closed past this, active or not.
const MAX_TRANSMISSION: Duration = Duration::from_secs(300);
const MONITOR_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SilenceTimeout,
    MaxDuration,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::SilenceTimeout => "silence_timeout",
            CloseReason::MaxDuration => "max_duration",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Everything known about a transmission once it has closed.
#[derive(Debug, Clone)]
pub struct CompletedTransmission {
    pub frequency_hz: f64,
    pub label: Option<String>,
    pub duration_secs: f64,
    pub peak_dbm: f64,
    pub average_dbm: f64,
    pub clip: Option<EncodedClip>,
    pub reason: CloseReason,
}

pub trait CompletionHandler: Send + Sync {
    fn on_complete(&self, transmission: &CompletedTransmission);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackStatus {
    pub attempts: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
}

struct ActiveTransmission {
    id: Uuid,
    frequency_hz: f64,
    label: Option<String>,
    started_at: Timestamp,
    opened: Instant,
    /// Last time the frequency read at or above the squelch threshold.
    active_marker: Instant,
    last_dbm: f64,
    peak_dbm: f64,
    signal_sum: f64,
    signal_count: u64,
    buffer: Arc<AudioBuffer>,
    playback_errors: u64,
}

impl ActiveTransmission {
    fn open(target: &ScanTarget, signal_dbm: f64, sample_rate: u32, max_clip_secs: f64) -> Self {
        let buffer = Arc::new(AudioBuffer::new(max_clip_secs, sample_rate));
        buffer.start_recording();
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            frequency_hz: target.frequency,
            label: target.label.clone(),
            started_at: Timestamp::now(),
            opened: now,
            active_marker: now,
            last_dbm: signal_dbm,
            peak_dbm: signal_dbm,
            signal_sum: 0.0,
            signal_count: 0,
            buffer,
            playback_errors: 0,
        }
    }
}

/// Tracks open transmissions per frequency: opens them on first
/// detection, feeds them cleaned audio, and closes them from a
/// background monitor once they go silent or run too long.
pub struct TransmissionLifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    dsp: Arc<DspProcessor>,
    encoder: ClipEncoder,
    playback: Arc<dyn PlaybackSink>,
    notifications: Arc<dyn NotificationSink>,
    store: Arc<dyn RecordStore>,
    completion: Option<Arc<dyn CompletionHandler>>,
    squelch_threshold: f64,
    silence_timeout: Duration,
    audio_sample_rate: u32,
    max_clip_secs: f64,
    active: Mutex<HashMap<u64, ActiveTransmission>>,
    playback_status: Mutex<PlaybackStatus>,
}

impl TransmissionLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        dsp: Arc<DspProcessor>,
        encoder: ClipEncoder,
        playback: Arc<dyn PlaybackSink>,
        notifications: Arc<dyn NotificationSink>,
        store: Arc<dyn RecordStore>,
        completion: Option<Arc<dyn CompletionHandler>>,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                dsp,
                encoder,
                playback,
                notifications,
                store,
                completion,
                squelch_threshold: config.scanning.squelch_threshold,
                silence_timeout: Duration::from_secs_f64(config.scanning.transmission_timeout),
                audio_sample_rate: config.audio.sample_rate,
                max_clip_secs: config.recording.max_duration,
                active: Mutex::new(HashMap::new()),
                playback_status: Mutex::new(PlaybackStatus::default()),
            }),
        }
    }

    /// Called for every reading above the squelch threshold. Opens a
    /// transmission on the first one and appends cleaned audio to its
    /// clip buffer on every one.
    pub fn handle_detection(&self, target: &ScanTarget, signal_dbm: f64, audio: Vec<f32>) {
        let key = target.frequency.to_bits();
        let mut opened_id = None;

        let buffer = {
            let mut active = lock(&self.inner.active);
            let record = active.entry(key).or_insert_with(|| {
                let record = ActiveTransmission::open(
                    target,
                    signal_dbm,
                    self.inner.audio_sample_rate,
                    self.inner.max_clip_secs,
                );
                opened_id = Some(record.id);
                record
            });
            record.last_dbm = signal_dbm;
            record.active_marker = Instant::now();
            if signal_dbm > record.peak_dbm {
                record.peak_dbm = signal_dbm;
            }
            record.signal_sum += signal_dbm;
            record.signal_count += 1;
            record.buffer.clone()
        };

        if let Some(id) = opened_id {
            self.announce_start(id, target, signal_dbm);
            let inner = self.inner.clone();
            tokio::spawn(monitor_transmission(inner, key));
        }

        // DSP, buffering and playback all run outside the map lock
        let processed = self.inner.dsp.process(audio);
        buffer.add_samples(&processed);
        let played = self.inner.playback.play(&processed);
        self.inner.record_playback(key, played);
    }

    /// Called for every reading, above or below the threshold, so the
    /// monitor sees silence on frequencies that went quiet.
    pub fn observe_signal(&self, frequency_hz: f64, signal_dbm: f64) {
        let mut active = lock(&self.inner.active);
        if let Some(record) = active.get_mut(&frequency_hz.to_bits()) {
            record.last_dbm = signal_dbm;
        }
    }

    pub fn open_count(&self) -> usize {
        lock(&self.inner.active).len()
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        lock(&self.inner.playback_status).clone()
    }

    /// Close every open transmission. Used on shutdown so partial
    /// clips still make it to disk.
    pub fn close_all(&self) {
        let keys: Vec<u64> = lock(&self.inner.active).keys().copied().collect();
        for key in keys {
            self.inner.close_transmission(key, CloseReason::Shutdown);
        }
    }

    fn announce_start(&self, id: Uuid, target: &ScanTarget, signal_dbm: f64) {
        eprintln!(
            "transmission started on {:.3} MHz at {:.1} dBm",
            target.frequency / 1e6,
            signal_dbm
        );
        let event = ScannerEvent::new_transmission_start(
            id,
            target.frequency,
            signal_dbm,
            target.modulation,
            target.label.clone(),
        );
        if let Err(e) = self.inner.notifications.notify(&event) {
            eprintln!("failed to publish transmission start: {e}");
        }

        let mut fields = FieldMap::new();
        fields.insert("frequency_hz".into(), target.frequency.into());
        fields.insert("modulation".into(), target.modulation.to_string().into());
        fields.insert("signal_strength_dbm".into(), signal_dbm.into());
        if let Some(label) = &target.label {
            fields.insert("label".into(), label.clone().into());
        }
        if let Err(e) = self.inner.store.create(RecordKind::Transmission, id, fields) {
            eprintln!("failed to persist transmission start: {e}");
        }
    }
}

impl LifecycleInner {
    fn record_playback(&self, key: u64, result: Result<(), PlaybackError>) {
        let mut status = lock(&self.playback_status);
        match result {
            Ok(()) => {
                status.attempts += 1;
                status.consecutive_failures = 0;
            }
            Err(e) => {
                status.attempts += 1;
                status.failures += 1;
                status.consecutive_failures += 1;
                // quiet down after the first few so a dead device
                // does not flood the log
                if status.consecutive_failures <= 3 {
                    eprintln!("monitor playback failed: {e}");
                }
                status.last_error = Some(e.to_string());
                drop(status);
                let mut active = lock(&self.active);
                if let Some(record) = active.get_mut(&key) {
                    record.playback_errors += 1;
                }
            }
        }
    }

    fn close_transmission(&self, key: u64, reason: CloseReason) {
        let Some(record) = lock(&self.active).remove(&key) else {
            return;
        };
        let (samples, _) = record.buffer.stop_recording();
        let duration_secs = record.opened.elapsed().as_secs_f64();
        let average_dbm = if record.signal_count == 0 {
            record.last_dbm
        } else {
            record.signal_sum / record.signal_count as f64
        };

        let clip = if samples.is_empty() {
            None
        } else {
            let info = ClipInfo {
                id: record.id,
                frequency_hz: record.frequency_hz,
                started_at: record.started_at,
                duration_secs,
                peak_dbm: record.peak_dbm,
                average_dbm,
            };
            match self.encoder.encode(&samples, &info) {
                Ok(clip) => Some(clip),
                Err(e) => {
                    eprintln!(
                        "failed to write clip for {:.3} MHz: {e}",
                        record.frequency_hz / 1e6
                    );
                    None
                }
            }
        };

        eprintln!(
            "transmission on {:.3} MHz closed after {:.1}s ({})",
            record.frequency_hz / 1e6,
            duration_secs,
            reason.as_str()
        );

        let completed = CompletedTransmission {
            frequency_hz: record.frequency_hz,
            label: record.label.clone(),
            duration_secs,
            peak_dbm: record.peak_dbm,
            average_dbm,
            clip: clip.clone(),
            reason,
        };
        if let Some(handler) = &self.completion {
            handler.on_complete(&completed);
        }

        let event = ScannerEvent::new_transmission_end(
            record.id,
            record.frequency_hz,
            duration_secs,
            record.peak_dbm,
            average_dbm,
            clip.as_ref().map(|c| c.path.clone()),
        );
        if let Err(e) = self.notifications.notify(&event) {
            eprintln!("failed to publish transmission end: {e}");
        }

        let mut fields = FieldMap::new();
        fields.insert("duration_seconds".into(), duration_secs.into());
        fields.insert("peak_signal_strength_dbm".into(), record.peak_dbm.into());
        fields.insert("average_signal_strength_dbm".into(), average_dbm.into());
        fields.insert("close_reason".into(), reason.as_str().into());
        fields.insert("playback_errors".into(), record.playback_errors.into());
        if let Some(clip) = &clip {
            fields.insert("clip_path".into(), clip.path.display().to_string().into());
            fields.insert("clip_size_bytes".into(), clip.size_bytes.into());
        }
        if let Err(e) = self
            .store
            .update(RecordKind::Transmission, record.id, fields)
        {
            eprintln!("failed to persist transmission close: {e}");
        }

        if let Some(clip) = &clip {
            let mut fields = FieldMap::new();
            fields.insert("transmission_id".into(), record.id.to_string().into());
            fields.insert("frequency_hz".into(), record.frequency_hz.into());
            fields.insert("path".into(), clip.path.display().to_string().into());
            fields.insert(
                "metadata_path".into(),
                clip.metadata_path.display().to_string().into(),
            );
            fields.insert("size_bytes".into(), clip.size_bytes.into());
            fields.insert("duration_seconds".into(), duration_secs.into());
            if let Err(e) = self
                .store
                .create(RecordKind::Recording, Uuid::new_v4(), fields)
            {
                eprintln!("failed to persist recording entry: {e}");
            }
        }
    }
}

async fn monitor_transmission(inner: Arc<LifecycleInner>, key: u64) {
    loop {
        tokio::time::sleep(MONITOR_POLL).await;
        let decision = {
            let mut active = lock(&inner.active);
            let Some(record) = active.get_mut(&key) else {
                break;
            };
            if record.last_dbm >= inner.squelch_threshold {
                record.active_marker = Instant::now();
            }
            close_decision(
                record.last_dbm,
                inner.squelch_threshold,
                record.active_marker.elapsed(),
                inner.silence_timeout,
                record.opened.elapsed(),
                MAX_TRANSMISSION,
            )
        };
        if let Some(reason) = decision {
            inner.close_transmission(key, reason);
            break;
        }
    }
}

fn close_decision(
    last_dbm: f64,
    squelch_threshold: f64,
    silence: Duration,
    silence_timeout: Duration,
    total: Duration,
    max_duration: Duration,
) -> Option<CloseReason> {
    if total >= max_duration {
        return Some(CloseReason::MaxDuration);
    }
    if last_dbm < squelch_threshold && silence >= silence_timeout {
        return Some(CloseReason::SilenceTimeout);
    }
    None
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
