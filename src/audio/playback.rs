use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("no default output device found")]
    NoDevice,
    #[error("audio output failed: {0}")]
    Output(String),
}

/// Live monitor output for demodulated audio.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, samples: &[f32]) -> Result<(), PlaybackError>;
}

/// Discards audio. Used when monitoring is off or no device is usable.
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn play(&self, _samples: &[f32]) -> Result<(), PlaybackError> {
        Ok(())
    }
}

const MAX_QUEUED_SECS: usize = 10;

/// Plays mono audio through the default output device, duplicating
/// each sample across every hardware channel. The queue is bounded;
/// when playback falls behind, the oldest audio is dropped.
pub struct CpalMonitor {
    queue: Arc<Mutex<VecDeque<f32>>>,
    max_queued: usize,
    _stream: Mutex<Option<cpal::Stream>>,
}

impl CpalMonitor {
    pub fn new(sample_rate: u32) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlaybackError::NoDevice)?;

        let supported = device
            .default_output_config()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(PlaybackError::Output(format!(
                "unsupported output sample format {:?}",
                supported.sample_format()
            )));
        }
        let mut config = supported.config();
        config.sample_rate = cpal::SampleRate(sample_rate);
        let channels = config.channels as usize;

        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let queue_clone = queue.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue_clone.lock().unwrap_or_else(|e| e.into_inner());
                    for frame in out.chunks_mut(channels) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }
                    }
                },
                move |err| eprintln!("monitor output stream error: {err}"),
                None,
            )
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        stream
            .play()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        Ok(Self {
            queue,
            max_queued: sample_rate as usize * MAX_QUEUED_SECS,
            _stream: Mutex::new(Some(stream)),
        })
    }
}

impl PlaybackSink for CpalMonitor {
    fn play(&self, samples: &[f32]) -> Result<(), PlaybackError> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        push_bounded(&mut queue, samples, self.max_queued);
        Ok(())
    }
}

fn push_bounded(queue: &mut VecDeque<f32>, samples: &[f32], max_queued: usize) {
    queue.extend(samples.iter().copied());
    let excess = queue.len().saturating_sub(max_queued);
    if excess > 0 {
        queue.drain(..excess);
    }
}
