//! Microphone capture
//!
//! Capture prefers a mono input config at the target rate. When the device
//! cannot do that it captures at whatever the hardware offers, downmixes to
//! mono, and resamples to the target rate before frame assembly. The cpal
//! callback only copies samples into a shared buffer; a drain task does the
//! conversion work and hands fixed-length frames to the session without ever
//! blocking the audio thread.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Resampler input chunk size in samples
const CONVERTER_CHUNK: usize = 1024;

/// How often the drain task empties the callback buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Source of capture frames for a session
///
/// Object safe so sessions can run against fakes where no audio hardware
/// exists.
pub trait MicSource {
    /// Begin capture, delivering fixed-length frames through `frames`
    ///
    /// # Errors
    ///
    /// Returns a permission error if microphone access is refused, or a
    /// device error for any other acquisition failure.
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()>;

    /// Stop capture and release the device
    fn stop(&mut self);

    /// Whether a capture stream is live
    fn is_capturing(&self) -> bool;
}

/// Captures from the default input device via cpal
pub struct CpalMic {
    config: CaptureConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
    drain: Option<JoinHandle<()>>,
}

impl CpalMic {
    /// Create an idle capture source; the device is acquired on
    /// [`start`](MicSource::start)
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            drain: None,
        }
    }
}

impl MicSource for CpalMic {
    #[allow(clippy::cast_precision_loss)]
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let stream_config = pick_input_config(&device, self.config.sample_rate)?;
        let device_rate = stream_config.sample_rate.0;
        let channels = usize::from(stream_config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate,
            channels,
            target_rate = self.config.sample_rate,
            echo_cancellation = self.config.echo_cancellation,
            noise_suppression = self.config.noise_suppression,
            auto_gain = self.config.auto_gain,
            "capture configured"
        );

        let converter = if device_rate == self.config.sample_rate {
            None
        } else {
            Some(RateConverter::new(device_rate, self.config.sample_rate)?)
        };

        let buffer = Arc::clone(&self.buffer);
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        if channels == 1 {
                            buf.extend_from_slice(data);
                        } else {
                            buf.extend(
                                data.chunks(channels)
                                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                            );
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "capture stream error");
                },
                None,
            )
            .map_err(|e| acquisition_error("failed to open capture stream", &e))?;

        stream
            .play()
            .map_err(|e| acquisition_error("failed to start capture stream", &e))?;

        self.drain = Some(tokio::spawn(drain_loop(
            Arc::clone(&self.buffer),
            converter,
            self.config.frame_len,
            frames,
        )));
        self.stream = Some(stream);

        tracing::debug!("capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.drain.take() {
            task.abort();
        }

        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("capture stopped");
        }

        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalMic {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick an input config: mono at the target rate, any channel count at the
/// target rate, then the device default
fn pick_input_config(device: &cpal::Device, target_rate: u32) -> Result<StreamConfig> {
    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| acquisition_error("failed to query input configs", &e))?
        .collect();

    let at_target = |c: &&cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(target_rate)
            && c.max_sample_rate() >= SampleRate(target_rate)
    };

    if let Some(c) = configs
        .iter()
        .find(|c| c.channels() == 1 && at_target(c))
        .or_else(|| configs.iter().find(at_target))
    {
        return Ok(c.with_sample_rate(SampleRate(target_rate)).config());
    }

    let default = device
        .default_input_config()
        .map_err(|e| acquisition_error("no suitable input config", &e))?;
    Ok(default.config())
}

/// Classify a device acquisition failure
///
/// Platform audio hosts report a refused microphone as an ordinary stream
/// error with access wording in the message, so classification is textual.
fn acquisition_error(context: &str, source: &dyn std::fmt::Display) -> Error {
    let message = source.to_string();
    let lowered = message.to_lowercase();

    if lowered.contains("permission") || lowered.contains("denied") {
        Error::Permission(message)
    } else {
        Error::Device(format!("{context}: {message}"))
    }
}

/// Drains the callback buffer, converts to the target rate, and emits
/// fixed-length frames
async fn drain_loop(
    buffer: Arc<Mutex<Vec<f32>>>,
    mut converter: Option<RateConverter>,
    frame_len: usize,
    frames: mpsc::Sender<Vec<f32>>,
) {
    let mut interval = tokio::time::interval(DRAIN_INTERVAL);
    let mut assembled: Vec<f32> = Vec::new();
    let mut dropped: u64 = 0;

    loop {
        interval.tick().await;

        let chunk = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        if chunk.is_empty() {
            continue;
        }

        match converter.as_mut() {
            Some(c) => assembled.extend(c.push(&chunk)),
            None => assembled.extend(chunk),
        }

        while assembled.len() >= frame_len {
            let frame: Vec<f32> = assembled.drain(..frame_len).collect();
            match frames.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    tracing::warn!(dropped, "session busy, capture frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}

/// Streaming device-rate to target-rate converter
///
/// Keeps resampler state across chunks so filter continuity holds for the
/// whole capture stream. Samples short of a full chunk stay pending until
/// more arrive.
struct RateConverter {
    resampler: FftFixedIn<f64>,
    pending: Vec<f64>,
}

impl RateConverter {
    #[allow(clippy::cast_possible_truncation)]
    fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler =
            FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CONVERTER_CHUNK, 2, 1)
                .map_err(|e| Error::Device(format!("resampler init failed: {e}")))?;

        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut out = Vec::new();
        while self.pending.len() >= CONVERTER_CHUNK {
            let chunk: Vec<f64> = self.pending.drain(..CONVERTER_CHUNK).collect();
            match self.resampler.process(&[chunk], None) {
                Ok(result) => out.extend(result[0].iter().map(|&s| s as f32)),
                Err(e) => {
                    tracing::warn!(error = %e, "capture resample failed, chunk dropped");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converter_holds_partial_chunks_until_full() {
        let mut converter = RateConverter::new(48_000, 16_000).expect("valid rates");

        let out = converter.push(&[0.0; CONVERTER_CHUNK - 1]);
        assert!(out.is_empty());

        let out = converter.push(&[0.0]);
        assert!(!out.is_empty());
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn converter_tracks_rate_ratio_over_time() {
        let mut converter = RateConverter::new(48_000, 16_000).expect("valid rates");

        let input: Vec<f32> = (0..48_000)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 200.0 / 48_000.0).sin())
            .collect();

        let mut total = 0;
        for chunk in input.chunks(3000) {
            total += converter.push(chunk).len();
        }

        // 3:1 downsample of 48k samples, allowing for samples still pending
        assert!((15_000..=16_000).contains(&total));
    }

    #[test]
    fn refused_access_classifies_as_permission() {
        let err = acquisition_error("failed to open capture stream", &"Permission denied by OS");
        assert!(matches!(err, Error::Permission(_)));

        let err = acquisition_error("failed to open capture stream", &"device disconnected");
        assert!(matches!(err, Error::Device(_)));
    }
}
