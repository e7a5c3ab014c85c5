//! Outbound audio batching
//!
//! Encoded capture frames accumulate here until enough audio is pending to
//! be worth a network send, or until the session's backstop flush fires.
//! While the transport is down the pending buffer is bounded: overflow
//! truncates the newest audio so the buffer never grows past the cap.

use crate::audio::AudioFormat;
use crate::config::BatchConfig;

/// A flushed batch ready for the transport, consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPayload {
    /// Format tag sent alongside the audio
    pub format: AudioFormat,

    /// Concatenated 16-bit PCM samples in capture order
    pub samples: Vec<i16>,
}

/// Accumulates encoded PCM blocks between flushes
pub struct OutboundBatcher {
    pending: Vec<Vec<i16>>,
    pending_samples: usize,
    min_flush_samples: usize,
    max_pending_samples: usize,
    format: AudioFormat,
}

impl OutboundBatcher {
    /// Create a batcher for audio in the given format
    #[must_use]
    pub const fn new(config: &BatchConfig, format: AudioFormat) -> Self {
        Self {
            pending: Vec::new(),
            pending_samples: 0,
            min_flush_samples: config.min_flush_samples,
            max_pending_samples: config.max_pending_samples,
            format,
        }
    }

    /// Append a block, trimming the newest samples if the cap is exceeded
    ///
    /// Trimming keeps the pending audio contiguous from its oldest sample;
    /// anything dropped here is gone, not retried.
    pub fn push(&mut self, block: Vec<i16>) {
        if block.is_empty() {
            return;
        }

        self.pending_samples += block.len();
        self.pending.push(block);

        if self.pending_samples > self.max_pending_samples {
            let mut excess = self.pending_samples - self.max_pending_samples;
            let dropped = excess;

            while excess > 0 {
                let Some(last) = self.pending.last_mut() else {
                    break;
                };

                if last.len() <= excess {
                    excess -= last.len();
                    self.pending.pop();
                } else {
                    last.truncate(last.len() - excess);
                    excess = 0;
                }
            }

            self.pending_samples = self.max_pending_samples;
            tracing::warn!(
                dropped,
                cap = self.max_pending_samples,
                "pending audio exceeded cap, newest samples dropped"
            );
        }
    }

    /// Whether enough audio is pending to flush without waiting for the
    /// backstop timer
    #[must_use]
    pub const fn ready(&self) -> bool {
        self.pending_samples >= self.min_flush_samples
    }

    /// Number of samples currently pending
    #[must_use]
    pub const fn pending_samples(&self) -> usize {
        self.pending_samples
    }

    /// Take everything pending as one payload, oldest first
    ///
    /// Returns `None` when nothing is pending. The backstop flush calls this
    /// regardless of [`ready`](Self::ready), so short batches still go out.
    pub fn flush(&mut self) -> Option<OutboundPayload> {
        if self.pending.is_empty() {
            return None;
        }

        let mut samples = Vec::with_capacity(self.pending_samples);
        for block in self.pending.drain(..) {
            samples.extend_from_slice(&block);
        }
        self.pending_samples = 0;

        Some(OutboundPayload {
            format: self.format,
            samples,
        })
    }
}
