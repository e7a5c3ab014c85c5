//! Audio playback
//!
//! The speaker plays one clip at a time and reports completion through a
//! callback fired from the output callback once the last sample is written.
//! The playback queue relies on that callback to drain; it never polls.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::config::PlaybackConfig;
use crate::{Error, Result};

/// Completion callback, fired exactly once per clip
pub type DoneCallback = Box<dyn FnOnce() + Send>;

/// Sink for decoded playback audio
///
/// Object safe so sessions can run against fakes where no audio hardware
/// exists.
pub trait AudioSink {
    /// Start playing a clip; `on_done` fires once the last sample has been
    /// written to the device
    ///
    /// # Errors
    ///
    /// Returns a device error if the output stream cannot be opened.
    fn play(&mut self, samples: Vec<f32>, on_done: DoneCallback) -> Result<()>;

    /// Stop the current clip; its completion callback never fires
    fn stop(&mut self);

    /// Native rate of the sink in Hz
    fn sample_rate(&self) -> u32;
}

/// Plays to the default output device via cpal
pub struct Speaker {
    sample_rate: u32,
    stream: Option<Stream>,
}

impl Speaker {
    /// Create an idle speaker; the device is acquired per clip
    #[must_use]
    pub const fn new(config: &PlaybackConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            stream: None,
        }
    }
}

impl AudioSink for Speaker {
    fn play(&mut self, samples: Vec<f32>, on_done: DoneCallback) -> Result<()> {
        self.stop();

        if samples.is_empty() {
            on_done();
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let config = pick_output_config(&device, self.sample_rate)?;
        let channels = usize::from(config.channels);

        let mut position = 0usize;
        let mut on_done = Some(on_done);
        let total = samples.len();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = if position < samples.len() {
                            let s = samples[position];
                            position += 1;
                            s
                        } else {
                            if let Some(done) = on_done.take() {
                                done();
                            }
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "playback stream error");
                },
                None,
            )
            .map_err(|e| Error::Device(format!("failed to open playback stream: {e}")))?;

        stream
            .play()
            .map_err(|e| Error::Device(format!("failed to start playback stream: {e}")))?;
        self.stream = Some(stream);

        tracing::debug!(samples = total, rate = self.sample_rate, "playback started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("playback stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick an output config at the sink rate: mono, then a stereo fallback
fn pick_output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Device(format!("failed to query output configs: {e}")))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

    Ok(supported.with_sample_rate(SampleRate(sample_rate)).config())
}
