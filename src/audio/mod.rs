//! Audio pipeline: PCM conversion, capture, batching, and playback

pub mod batcher;
pub mod capture;
pub mod pcm;
pub mod playback;
pub mod queue;

use crate::{Error, Result};

/// Format tag for a raw PCM payload, carried on the wire as a mime string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Raw 16-bit mono PCM at the given rate
    #[must_use]
    pub const fn pcm(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Render as a mime string, e.g. `audio/pcm;rate=16000`
    #[must_use]
    pub fn mime(self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Parse a PCM mime string
    ///
    /// Returns `None` for non-PCM subtypes or a missing/invalid rate
    /// parameter.
    #[must_use]
    pub fn parse_mime(mime: &str) -> Option<Self> {
        let mut parts = mime.split(';');
        if parts.next()?.trim() != "audio/pcm" {
            return None;
        }

        for param in parts {
            if let Some(rate) = param.trim().strip_prefix("rate=") {
                return rate.parse().ok().map(Self::pcm);
            }
        }

        None
    }
}

/// Resample a complete clip between sample rates using rubato
///
/// The final partial chunk is zero padded so no trailing audio is lost; the
/// output is trimmed back to the rate-converted input length.
///
/// # Errors
///
/// Returns a decode error if the resampler rejects the rate pair.
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Decode(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(chunk_size) {
        let frame = if chunk.len() == chunk_size {
            chunk.to_vec()
        } else {
            let mut padded = chunk.to_vec();
            padded.resize(chunk_size, 0.0);
            padded
        };

        let result = resampler
            .process(&[frame], None)
            .map_err(|e| Error::Decode(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    let expected =
        (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    output.truncate(expected);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_renders_subtype_and_rate() {
        assert_eq!(AudioFormat::pcm(16_000).mime(), "audio/pcm;rate=16000");
        assert_eq!(AudioFormat::pcm(24_000).mime(), "audio/pcm;rate=24000");
    }

    #[test]
    fn mime_parses_with_whitespace_and_extra_params() {
        assert_eq!(
            AudioFormat::parse_mime("audio/pcm;rate=24000"),
            Some(AudioFormat::pcm(24_000))
        );
        assert_eq!(
            AudioFormat::parse_mime("audio/pcm; rate=16000; channels=1"),
            Some(AudioFormat::pcm(16_000))
        );
    }

    #[test]
    fn mime_rejects_unknown_subtype_or_missing_rate() {
        assert_eq!(AudioFormat::parse_mime("audio/mp3;rate=16000"), None);
        assert_eq!(AudioFormat::parse_mime("audio/pcm"), None);
        assert_eq!(AudioFormat::parse_mime("audio/pcm;rate=later"), None);
    }

    #[test]
    fn resample_is_identity_for_equal_rates() {
        let samples = vec![0.1, -0.2, 0.3];
        let out = resample(&samples, 16_000, 16_000).expect("identity");
        assert_eq!(out, samples);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn resample_halves_length_for_double_rate() {
        let tone: Vec<f32> = (0..32_000)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 32_000.0).sin())
            .collect();

        let out = resample(&tone, 32_000, 16_000).expect("downsample");
        assert_eq!(out.len(), 16_000);
        assert!(out.iter().all(|s| s.abs() <= 1.01));
    }
}
