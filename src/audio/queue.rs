//! Inbound audio decoding and playback sequencing
//!
//! Received audio decodes at enqueue time and waits in a strict FIFO. At
//! most one clip plays at once; the session pops the next clip only after
//! the sink reports the previous one finished. A corrupt payload is dropped
//! without disturbing anything already queued.

use std::collections::VecDeque;

use crate::audio::{pcm, resample, AudioFormat};
use crate::Result;

/// FIFO of decoded clips awaiting playback
pub struct PlaybackQueue {
    items: VecDeque<Vec<f32>>,
    playing: bool,
    sink_rate: u32,
}

impl PlaybackQueue {
    /// Create an empty queue targeting the sink's native rate
    #[must_use]
    pub const fn new(sink_rate: u32) -> Self {
        Self {
            items: VecDeque::new(),
            playing: false,
            sink_rate,
        }
    }

    /// Decode an inbound payload and append it to the queue
    ///
    /// Audio at a rate other than the sink's is resampled here, once, so
    /// playback never converts under time pressure.
    ///
    /// # Errors
    ///
    /// Returns a decode error for malformed payloads. The queue is unchanged
    /// and later enqueues are unaffected.
    pub fn enqueue(&mut self, format: AudioFormat, bytes: &[u8]) -> Result<()> {
        let samples = pcm::bytes_to_samples(bytes)?;
        if samples.is_empty() {
            tracing::debug!("empty audio payload skipped");
            return Ok(());
        }

        let clip = resample(&pcm::decode(&samples), format.sample_rate, self.sink_rate)?;
        self.items.push_back(clip);
        Ok(())
    }

    /// Pop the next clip, unless one is already playing
    ///
    /// The caller owns handing the clip to the sink; the queue marks it as
    /// playing until [`finish_current`](Self::finish_current).
    pub fn next_to_play(&mut self) -> Option<Vec<f32>> {
        if self.playing {
            return None;
        }

        let clip = self.items.pop_front()?;
        self.playing = true;
        Some(clip)
    }

    /// Mark the playing clip finished
    pub fn finish_current(&mut self) {
        self.playing = false;
    }

    /// Whether a clip is currently marked playing
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether nothing is playing and nothing is queued
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.playing && self.items.is_empty()
    }

    /// Number of clips waiting behind the current one
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the waiting queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop everything queued and forget the playing clip
    pub fn clear(&mut self) {
        self.items.clear();
        self.playing = false;
    }
}
