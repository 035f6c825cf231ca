use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rustfft::num_complex::Complex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{Config, Modulation, PriorityConfig, ScanMode, ScanTarget, ScanningConfig};
use crate::device::{DeviceError, SdrDevice};
use crate::lifecycle::TransmissionLifecycle;
use crate::protocol::{NotificationSink, ScannerEvent};
use crate::signal;

const SAMPLE_BLOCK_LEN: usize = 8192;
const TUNE_SETTLE: Duration = Duration::from_millis(10);
/// Priority at or above which a frequency is never skipped for being quiet.
const PRIORITY_EXEMPT: u8 = 50;

/// Walks the scan list, reads one sample block per visit and hands
/// anything above the squelch threshold to the transmission lifecycle.
pub struct FrequencyScanScheduler {
    inner: Arc<ScannerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct ScannerInner {
    targets: Vec<ScanTarget>,
    base_weights: Vec<f64>,
    scanning_config: ScanningConfig,
    priority: PriorityConfig,
    device: tokio::sync::Mutex<Box<dyn SdrDevice>>,
    lifecycle: Arc<TransmissionLifecycle>,
    notifications: Arc<dyn NotificationSink>,
    scanning: AtomicBool,
    state: Mutex<ScanState>,
    rng: Mutex<fastrand::Rng>,
    started: Instant,
}

struct ScanState {
    stats: Vec<FreqStats>,
    round_robin: usize,
    cycles: u64,
    current: Option<usize>,
}

#[derive(Debug, Clone)]
struct FreqStats {
    scan_count: u64,
    /// Recent-activity score, 0 to 10.
    activity: f64,
    /// Consecutive scans below the squelch threshold.
    quiet_streak: u32,
    last_signal_dbm: f64,
}

impl Default for FreqStats {
    fn default() -> Self {
        Self {
            scan_count: 0,
            activity: 0.0,
            quiet_streak: 0,
            last_signal_dbm: signal::NOISE_FLOOR_DBM,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannerStatus {
    pub scanning: bool,
    pub target_count: usize,
    pub scan_cycles: u64,
    pub open_transmissions: usize,
    pub uptime_secs: f64,
    pub current_frequency_hz: Option<f64>,
}

/// Per-frequency counters, exported for status output.
#[derive(Debug, Clone, Serialize)]
pub struct FrequencyStats {
    pub frequency_hz: f64,
    pub label: Option<String>,
    pub priority: u8,
    pub enabled: bool,
    pub scan_count: u64,
    pub activity: f64,
    pub quiet_streak: u32,
    pub last_signal_dbm: f64,
    pub weight: f64,
}

impl FrequencyScanScheduler {
    pub fn new(
        config: &Config,
        device: Box<dyn SdrDevice>,
        lifecycle: Arc<TransmissionLifecycle>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let max_priority = config
            .frequencies
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.priority)
            .max()
            .unwrap_or(0);
        let base_weights = config
            .frequencies
            .iter()
            .map(|t| priority_weight(t.priority, max_priority, &config.priority))
            .collect();
        let stats = vec![FreqStats::default(); config.frequencies.len()];

        Self {
            inner: Arc::new(ScannerInner {
                targets: config.frequencies.clone(),
                base_weights,
                scanning_config: config.scanning.clone(),
                priority: config.priority.clone(),
                device: tokio::sync::Mutex::new(device),
                lifecycle,
                notifications,
                scanning: AtomicBool::new(false),
                state: Mutex::new(ScanState {
                    stats,
                    round_robin: 0,
                    cycles: 0,
                    current: None,
                }),
                rng: Mutex::new(fastrand::Rng::new()),
                started: Instant::now(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        if self.inner.scanning.swap(true, Ordering::SeqCst) {
            eprintln!("scanner is already running");
            return;
        }
        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.scan_loop());
        *lock(&self.task) = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.inner.scanning.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn status(&self) -> ScannerStatus {
        let state = lock(&self.inner.state);
        ScannerStatus {
            scanning: self.inner.scanning.load(Ordering::SeqCst),
            target_count: self.inner.targets.iter().filter(|t| t.enabled).count(),
            scan_cycles: state.cycles,
            open_transmissions: self.inner.lifecycle.open_count(),
            uptime_secs: self.inner.started.elapsed().as_secs_f64(),
            current_frequency_hz: state.current.map(|i| self.inner.targets[i].frequency),
        }
    }

    pub fn frequency_stats(&self) -> Vec<FrequencyStats> {
        let state = lock(&self.inner.state);
        self.inner
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| FrequencyStats {
                frequency_hz: target.frequency,
                label: target.label.clone(),
                priority: target.priority,
                enabled: target.enabled,
                scan_count: state.stats[i].scan_count,
                activity: state.stats[i].activity,
                quiet_streak: state.stats[i].quiet_streak,
                last_signal_dbm: state.stats[i].last_signal_dbm,
                weight: self.inner.base_weights[i],
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn reset_stats(&self) {
        let mut state = lock(&self.inner.state);
        for stats in &mut state.stats {
            *stats = FreqStats::default();
        }
        state.round_robin = 0;
        state.cycles = 0;
        state.current = None;
    }
}

impl ScannerInner {
    async fn scan_loop(self: Arc<Self>) {
        while self.scanning.load(Ordering::SeqCst) {
            let candidates = {
                let state = lock(&self.state);
                smart_candidates(
                    &self.targets,
                    &state.stats,
                    self.scanning_config.quiet_threshold,
                )
            };
            if candidates.is_empty() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let index = self.select_index(&candidates);
            let target = self.targets[index].clone();
            lock(&self.state).current = Some(index);

            let block = match self.acquire_block(target.frequency).await {
                Ok(samples) => Some(samples),
                Err(e) => {
                    eprintln!("scan of {:.3} MHz failed: {e}", target.frequency / 1e6);
                    None
                }
            };
            let power = match &block {
                Some(samples) => signal::calculate_power(samples),
                None => signal::NOISE_FLOOR_DBM,
            };

            let event = ScannerEvent::new_signal_strength(target.frequency, power);
            if let Err(e) = self.notifications.notify(&event) {
                eprintln!("failed to publish signal reading: {e}");
            }
            self.lifecycle.observe_signal(target.frequency, power);

            let transmitting = block.as_ref().is_some_and(|samples| {
                signal::detect_transmission(samples, self.scanning_config.squelch_threshold)
            });
            if transmitting && let Some(samples) = block {
                let audio = match target.modulation {
                    Modulation::Am => signal::demodulate_am(&samples),
                    Modulation::Fm => signal::demodulate_fm(&samples),
                };
                self.lifecycle.handle_detection(&target, power, audio);
            }

            let delay = {
                let mut state = lock(&self.state);
                state.cycles += 1;
                let stats = &mut state.stats[index];
                stats.last_signal_dbm = power;
                update_after_scan(stats, transmitting);
                adaptive_delay(&self.scanning_config, transmitting, stats.quiet_streak)
            };
            tokio::time::sleep(delay).await;
        }
    }

    fn select_index(&self, candidates: &[usize]) -> usize {
        if candidates.len() == 1 {
            return candidates[0];
        }
        let mut state = lock(&self.state);

        if !self.priority.enabled {
            return match self.priority.scan_mode {
                ScanMode::RoundRobin => candidates[rotate_slot(&mut state.round_robin, candidates.len())],
                ScanMode::Weighted => {
                    // weigh recent activity much harder than static priority
                    let weights: Vec<f64> = candidates
                        .iter()
                        .map(|&i| {
                            self.targets[i].priority.max(1) as f64
                                + state.stats[i].activity * 10.0
                        })
                        .collect();
                    let mut rng = lock(&self.rng);
                    candidates[weighted_pick(&mut rng, &weights)]
                }
            };
        }

        match self.priority.scan_mode {
            ScanMode::RoundRobin => candidates[rotate_slot(&mut state.round_robin, candidates.len())],
            ScanMode::Weighted => {
                let total_scans: u64 = candidates
                    .iter()
                    .map(|&i| state.stats[i].scan_count)
                    .sum();
                let weight_total: f64 = candidates.iter().map(|&i| self.base_weights[i]).sum();
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|&i| {
                        let base = self.base_weights[i];
                        let expected = base / weight_total;
                        let actual = if total_scans == 0 {
                            0.0
                        } else {
                            state.stats[i].scan_count as f64 / total_scans as f64
                        };
                        let boost =
                            fairness_boost(expected, actual, self.priority.fairness_boost_cap);
                        (base * boost).max(0.1)
                    })
                    .collect();
                let mut rng = lock(&self.rng);
                candidates[weighted_pick(&mut rng, &weights)]
            }
        }
    }

    async fn acquire_block(&self, frequency_hz: f64) -> Result<Vec<Complex<f32>>, DeviceError> {
        let mut device = self.device.lock().await;
        device.set_center_frequency(frequency_hz)?;
        if device.needs_settle() {
            tokio::time::sleep(TUNE_SETTLE).await;
        }
        device.read_iq_block(SAMPLE_BLOCK_LEN)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Static weight for a target: min_weight for priority zero, scaling
/// linearly up to the multiplier for the highest configured priority.
fn priority_weight(priority: u8, max_priority: u8, config: &PriorityConfig) -> f64 {
    let normalized = if max_priority == 0 {
        0.5
    } else {
        priority as f64 / max_priority as f64
    };
    config.min_weight + normalized * (config.multiplier - config.min_weight)
}

/// Boost for targets that received less than their fair share of scans.
fn fairness_boost(expected_share: f64, actual_share: f64, cap: f64) -> f64 {
    if actual_share < expected_share {
        (1.0 + (expected_share - actual_share) * 2.0).min(cap)
    } else {
        1.0
    }
}

fn weighted_pick(rng: &mut fastrand::Rng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return rng.usize(..weights.len());
    }
    let mut roll = rng.f64() * total;
    for (index, weight) in weights.iter().enumerate() {
        roll -= weight;
        if roll <= 0.0 {
            return index;
        }
    }
    weights.len() - 1
}

fn rotate_slot(counter: &mut usize, len: usize) -> usize {
    let slot = *counter % len;
    *counter = counter.wrapping_add(1);
    slot
}

/// Pick the scan list for this cycle. Frequencies that have been quiet
/// too long are skipped unless they carry a high priority; when that
/// empties the list, every enabled frequency is back in play.
fn smart_candidates(
    targets: &[ScanTarget],
    stats: &[FreqStats],
    quiet_threshold: u32,
) -> Vec<usize> {
    let enabled: Vec<usize> = targets
        .iter()
        .enumerate()
        .filter(|(_, t)| t.enabled)
        .map(|(i, _)| i)
        .collect();
    let active: Vec<usize> = enabled
        .iter()
        .copied()
        .filter(|&i| {
            targets[i].priority >= PRIORITY_EXEMPT || stats[i].quiet_streak < quiet_threshold
        })
        .collect();
    if active.is_empty() { enabled } else { active }
}

/// Dwell shorter where something is happening, longer where nothing is.
fn adaptive_delay(config: &ScanningConfig, active: bool, quiet_streak: u32) -> Duration {
    let secs = if active {
        (config.scan_delay * 0.5).max(config.min_scan_delay)
    } else if quiet_streak > config.quiet_threshold {
        (config.scan_delay * (1.0 + quiet_streak as f64 * 0.2)).min(config.max_scan_delay)
    } else {
        config.scan_delay
    };
    Duration::from_secs_f64(secs)
}

fn update_after_scan(stats: &mut FreqStats, active: bool) {
    stats.scan_count += 1;
    if active {
        stats.quiet_streak = 0;
        stats.activity = (stats.activity + 1.0).min(10.0);
    } else {
        stats.quiet_streak += 1;
        stats.activity = (stats.activity - 0.5).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ClipEncoder, NullSink};
    use crate::device::SimulatedSdr;
    use crate::dsp::DspProcessor;
    use crate::protocol::NotifyError;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn priority_config() -> PriorityConfig {
        PriorityConfig::default()
    }

    fn target(frequency: f64, priority: u8, enabled: bool) -> ScanTarget {
        ScanTarget {
            frequency,
            modulation: Modulation::Fm,
            priority,
            enabled,
            label: None,
        }
    }

    #[test]
    fn test_priority_weight_spans_floor_to_multiplier() {
        let config = priority_config();
        assert!((priority_weight(0, 80, &config) - 0.5).abs() < 1e-9);
        assert!((priority_weight(80, 80, &config) - 2.0).abs() < 1e-9);
        assert!((priority_weight(10, 80, &config) - 0.6875).abs() < 1e-9);
    }

    #[test]
    fn test_priority_weight_flat_list_sits_midway() {
        let config = priority_config();
        assert!((priority_weight(0, 0, &config) - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_pick_follows_weights() {
        let mut rng = fastrand::Rng::with_seed(7);
        let weights = [2.0, 0.6875];
        let mut hits = [0usize; 2];
        for _ in 0..10_000 {
            hits[weighted_pick(&mut rng, &weights)] += 1;
        }
        let share = hits[0] as f64 / 10_000.0;
        let expected = 2.0 / 2.6875;
        assert!(
            (share - expected).abs() < 0.05,
            "share {share} expected {expected}"
        );
    }

    #[test]
    fn test_weighted_pick_survives_zero_weights() {
        let mut rng = fastrand::Rng::with_seed(7);
        let index = weighted_pick(&mut rng, &[0.0, 0.0, 0.0]);
        assert!(index < 3);
    }

    #[test]
    fn test_fairness_boost_raises_starved_targets() {
        assert!((fairness_boost(0.5, 0.5, 3.0) - 1.0).abs() < 1e-9);
        assert!((fairness_boost(0.5, 0.7, 3.0) - 1.0).abs() < 1e-9);
        assert!((fairness_boost(0.5, 0.4, 3.0) - 1.2).abs() < 1e-9);
        // far behind: capped
        assert!((fairness_boost(0.9, 0.0, 3.0) - 2.8).abs() < 1e-9);
        assert!((fairness_boost(0.9, 0.0, 1.5) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_rotate_slot_cycles() {
        let mut counter = 0;
        let picks: Vec<usize> = (0..5).map(|_| rotate_slot(&mut counter, 3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_smart_candidates_skips_quiet_frequencies() {
        let targets = vec![
            target(118_000_000.0, 0, true),
            target(121_500_000.0, 0, true),
            target(155_160_000.0, 0, false),
        ];
        let mut stats = vec![FreqStats::default(); 3];
        stats[1].quiet_streak = 10;
        let picks = smart_candidates(&targets, &stats, 10);
        assert_eq!(picks, vec![0]);
    }

    #[test]
    fn test_smart_candidates_never_skips_high_priority() {
        let targets = vec![
            target(118_000_000.0, 0, true),
            target(121_500_000.0, 80, true),
        ];
        let mut stats = vec![FreqStats::default(); 2];
        stats[1].quiet_streak = 500;
        let picks = smart_candidates(&targets, &stats, 10);
        assert_eq!(picks, vec![0, 1]);
    }

    #[test]
    fn test_smart_candidates_falls_back_when_all_quiet() {
        let targets = vec![
            target(118_000_000.0, 0, true),
            target(121_500_000.0, 0, true),
        ];
        let mut stats = vec![FreqStats::default(); 2];
        stats[0].quiet_streak = 30;
        stats[1].quiet_streak = 30;
        let picks = smart_candidates(&targets, &stats, 10);
        assert_eq!(picks, vec![0, 1]);
    }

    #[test]
    fn test_adaptive_delay_branches() {
        let config = ScanningConfig::default();
        assert_eq!(
            adaptive_delay(&config, true, 0),
            Duration::from_secs_f64(0.05)
        );
        assert_eq!(
            adaptive_delay(&config, false, 3),
            Duration::from_secs_f64(0.1)
        );
        // long quiet streak backs off, up to the cap
        assert_eq!(
            adaptive_delay(&config, false, 15),
            Duration::from_secs_f64(0.1 * 4.0)
        );
        assert_eq!(
            adaptive_delay(&config, false, 100),
            Duration::from_secs_f64(2.0)
        );
    }

    #[test]
    fn test_update_after_scan_bounds_activity() {
        let mut stats = FreqStats::default();
        for _ in 0..15 {
            update_after_scan(&mut stats, true);
        }
        assert_eq!(stats.activity, 10.0);
        assert_eq!(stats.quiet_streak, 0);
        assert_eq!(stats.scan_count, 15);

        for _ in 0..25 {
            update_after_scan(&mut stats, false);
        }
        assert_eq!(stats.activity, 0.0);
        assert_eq!(stats.quiet_streak, 25);
    }

    struct SilentSink;

    impl NotificationSink for SilentSink {
        fn notify(&self, _event: &ScannerEvent) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scan_loop_counts_every_visit() {
        let mut config = Config::default();
        config.frequencies = vec![
            target(145_500_000.0, 0, true),
            target(118_000_000.0, 0, true),
        ];
        config.scanning.scan_delay = 0.01;
        config.scanning.min_scan_delay = 0.005;

        let dir = std::env::temp_dir().join(format!("bandscan-scan-{}", Uuid::new_v4()));
        let encoder = ClipEncoder::new(dir.clone(), &config.recording, 48_000).unwrap();
        let dsp = Arc::new(DspProcessor::new(48_000, config.dsp.clone()));
        let notifications: Arc<dyn NotificationSink> = Arc::new(SilentSink);
        let lifecycle = Arc::new(TransmissionLifecycle::new(
            &config,
            dsp,
            encoder,
            Arc::new(NullSink),
            notifications.clone(),
            Arc::new(MemoryStore::new()),
            None,
        ));

        let device = Box::new(SimulatedSdr::with_seed(145_500_000.0, 1));
        let scanner =
            FrequencyScanScheduler::new(&config, device, lifecycle.clone(), notifications);

        scanner.start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(scanner.status().scanning);
        scanner.stop().await;
        lifecycle.close_all();

        let status = scanner.status();
        assert!(!status.scanning);
        assert!(status.scan_cycles > 0);
        assert!(status.current_frequency_hz.is_some());

        let stats = scanner.frequency_stats();
        let visits: u64 = stats.iter().map(|s| s.scan_count).sum();
        assert_eq!(visits, status.scan_cycles);
        assert!(
            stats
                .iter()
                .filter(|s| s.scan_count > 0)
                .all(|s| s.last_signal_dbm > signal::NOISE_FLOOR_DBM)
        );

        scanner.reset_stats();
        assert_eq!(scanner.status().scan_cycles, 0);
        assert!(scanner.frequency_stats().iter().all(|s| s.scan_count == 0));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
