//! Wire protocol for the speech endpoint
//!
//! Frames are JSON text messages tagged by `type`. Audio rides inside them
//! as base64 over little-endian 16-bit PCM, labeled with a mime string such
//! as `audio/pcm;rate=16000`. Turn completion is its own frame, not a
//! property of the audio that precedes it.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::audio::batcher::OutboundPayload;
use crate::audio::{pcm, AudioFormat};
use crate::config::EndpointConfig;
use crate::{Error, Result};

/// Message sent to the endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Session announcement, sent once right after the handshake
    Setup {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
        /// Mime tag of the audio this client will stream
        input_format: String,
    },
    /// A batch of captured audio
    Audio { mime_type: String, data: String },
    /// Typed user text
    Text { text: String },
}

/// Message received from the endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Synthesized speech to queue for playback
    Audio { mime_type: String, data: String },
    /// Transcript text for one side of the conversation
    Transcript { role: TranscriptRole, text: String },
    /// The remote speaker finished its turn
    TurnComplete,
    /// Endpoint-reported error
    Error { code: String, message: String },
}

/// Which side of the conversation a transcript line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl ClientFrame {
    /// Build the setup frame for a session
    #[must_use]
    pub fn setup(endpoint: &EndpointConfig, input_format: AudioFormat) -> Self {
        Self::Setup {
            model: endpoint.model.clone(),
            voice: endpoint.voice.clone(),
            input_format: input_format.mime(),
        }
    }

    /// Build an audio frame from a flushed batch
    #[must_use]
    pub fn audio(payload: &OutboundPayload) -> Self {
        Self::Audio {
            mime_type: payload.format.mime(),
            data: base64::engine::general_purpose::STANDARD
                .encode(pcm::samples_to_bytes(&payload.samples)),
        }
    }
}

/// Unpack an inbound audio frame into its format tag and raw PCM bytes
///
/// # Errors
///
/// Returns a protocol error for an unrecognized mime string and a decode
/// error for invalid base64.
pub fn decode_audio(mime_type: &str, data: &str) -> Result<(AudioFormat, Vec<u8>)> {
    let format = AudioFormat::parse_mime(mime_type)
        .ok_or_else(|| Error::Protocol(format!("unrecognized audio mime: {mime_type}")))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::Decode(format!("invalid base64 audio payload: {e}")))?;

    Ok((format, bytes))
}
