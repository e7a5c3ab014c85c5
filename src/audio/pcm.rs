//! Float to 16-bit linear PCM conversion
//!
//! The outbound wire format is signed 16-bit little-endian PCM. Capture
//! produces f32 samples in [-1.0, 1.0]; inbound audio arrives as raw i16
//! bytes and is converted back for the playback path.

use crate::{Error, Result};

/// Convert f32 samples in [-1.0, 1.0] to 16-bit PCM
///
/// Out-of-range samples clip to full scale. NaN maps to silence rather than
/// poisoning the clamp.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            if s.is_nan() {
                0
            } else {
                (s.clamp(-1.0, 1.0) * 32767.0).round() as i16
            }
        })
        .collect()
}

/// Convert 16-bit PCM back to f32 samples
#[must_use]
pub fn decode(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Interpret little-endian bytes as 16-bit PCM samples
///
/// # Errors
///
/// Returns a decode error if the byte length is odd.
pub fn bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "pcm payload has odd byte length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serialize 16-bit PCM samples as little-endian bytes
#[must_use]
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
