use std::sync::Mutex;
use std::time::Instant;

/// Fixed-capacity sample buffer for one transmission. Written by the
/// scan path and drained by the lifecycle monitor, so all state sits
/// behind an internal lock. When full, the oldest audio is dropped to
/// make room; the most recent `max_duration` seconds always survive.
pub struct AudioBuffer {
    max_samples: usize,
    inner: Mutex<BufferState>,
}

struct BufferState {
    samples: Vec<f32>,
    recording: bool,
    started: Option<Instant>,
    overflow_logged: bool,
}

impl AudioBuffer {
    pub fn new(max_duration_secs: f64, sample_rate: u32) -> Self {
        let max_samples = ((max_duration_secs * f64::from(sample_rate)) as usize).max(1);
        Self {
            max_samples,
            inner: Mutex::new(BufferState {
                samples: Vec::new(),
                recording: false,
                started: None,
                overflow_logged: false,
            }),
        }
    }

    /// Clear any previous contents and begin accumulating.
    pub fn start_recording(&self) {
        let mut state = self.lock();
        state.samples = Vec::with_capacity(self.max_samples.min(1 << 20));
        state.recording = true;
        state.started = Some(Instant::now());
        state.overflow_logged = false;
    }

    /// Append samples while recording. Ignored otherwise.
    pub fn add_samples(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.lock();
        if !state.recording {
            return;
        }

        let remaining = self.max_samples - state.samples.len();
        let take = samples.len().min(remaining);
        state.samples.extend_from_slice(&samples[..take]);

        let overflow = samples.len() - take;
        if overflow == 0 {
            return;
        }

        if !state.overflow_logged {
            eprintln!(
                "audio buffer full ({} samples), dropping oldest audio",
                self.max_samples
            );
            state.overflow_logged = true;
        }

        if overflow >= self.max_samples {
            // the incoming block alone fills the buffer
            state.samples.clear();
            let tail = &samples[samples.len() - self.max_samples..];
            state.samples.extend_from_slice(tail);
        } else {
            state.samples.drain(..overflow);
            state.samples.extend_from_slice(&samples[take..]);
        }
    }

    /// Stop and hand back everything captured plus the elapsed time.
    /// A second call without a new `start_recording` yields nothing.
    pub fn stop_recording(&self) -> (Vec<f32>, f64) {
        let mut state = self.lock();
        state.recording = false;
        let duration = state
            .started
            .take()
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (std::mem::take(&mut state.samples), duration)
    }

    #[cfg(test)]
    fn is_recording(&self) -> bool {
        self.lock().recording
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_capture_round_trip() {
        let buffer = AudioBuffer::new(1.0, 100);
        buffer.start_recording();
        buffer.add_samples(&block(0, 50));
        let (samples, duration) = buffer.stop_recording();
        assert_eq!(samples, block(0, 50));
        assert!(duration >= 0.0);
        assert!(!buffer.is_recording());
    }

    #[test]
    fn test_samples_ignored_while_stopped() {
        let buffer = AudioBuffer::new(1.0, 100);
        buffer.add_samples(&block(0, 10));
        let (samples, duration) = buffer.stop_recording();
        assert!(samples.is_empty());
        assert_eq!(duration, 0.0);
    }

    #[test]
    fn test_second_stop_is_empty() {
        let buffer = AudioBuffer::new(1.0, 100);
        buffer.start_recording();
        buffer.add_samples(&block(0, 20));
        let (first, _) = buffer.stop_recording();
        assert_eq!(first.len(), 20);
        let (second, duration) = buffer.stop_recording();
        assert!(second.is_empty());
        assert_eq!(duration, 0.0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        // capacity 10: writing 8 then 5 keeps the last 10 in order
        let buffer = AudioBuffer::new(0.1, 100);
        buffer.start_recording();
        buffer.add_samples(&block(0, 8));
        buffer.add_samples(&block(8, 5));
        let (samples, _) = buffer.stop_recording();
        assert_eq!(samples, block(3, 10));
    }

    #[test]
    fn test_block_larger_than_capacity() {
        let buffer = AudioBuffer::new(0.1, 100);
        buffer.start_recording();
        buffer.add_samples(&block(0, 25));
        let (samples, _) = buffer.stop_recording();
        assert_eq!(samples, block(15, 10));
    }

    #[test]
    fn test_exact_fill_has_no_overflow() {
        let buffer = AudioBuffer::new(0.1, 100);
        buffer.start_recording();
        buffer.add_samples(&block(0, 10));
        let (samples, _) = buffer.stop_recording();
        assert_eq!(samples, block(0, 10));
    }

    #[test]
    fn test_restart_clears_previous_audio() {
        let buffer = AudioBuffer::new(1.0, 100);
        buffer.start_recording();
        buffer.add_samples(&block(0, 30));
        buffer.start_recording();
        buffer.add_samples(&block(100, 5));
        let (samples, _) = buffer.stop_recording();
        assert_eq!(samples, block(100, 5));
    }
}
