//! Lyra - realtime voice session client for speech-to-speech AI endpoints
//!
//! This library provides the core of a streaming voice conversation:
//! - Microphone capture with resampling and fixed-size framing
//! - 16-bit PCM encoding and bounded outbound batching
//! - A WebSocket transport speaking tagged JSON frames with base64 audio
//! - A strictly ordered playback queue over the system speaker
//! - A conversation state machine driving it all from one event loop
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   frames   ┌─────────┐  payloads  ┌───────────┐
//! │ CpalMic  ├───────────▶│ Session ├───────────▶│ Transport │
//! └──────────┘            │  loop   │◀───────────┤ WebSocket │
//! ┌──────────┐   done     │         │   events   └───────────┘
//! │ Speaker  │◀───────────┤         │
//! └──────────┘  playback  └────┬────┘
//!                              │ notifications
//!                              ▼
//!                        session owner (UI)
//! ```
//!
//! The session loop is the single writer of conversation state. Producers
//! (the audio callback, the socket reader) only send messages into it.

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transcript;
pub mod transport;

pub use audio::batcher::{OutboundBatcher, OutboundPayload};
pub use audio::capture::{CpalMic, MicSource};
pub use audio::playback::{AudioSink, DoneCallback, Speaker};
pub use audio::queue::PlaybackQueue;
pub use audio::AudioFormat;
pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    ConversationState, Notification, Session, SessionCommand, SessionHandle,
};
pub use transcript::{Origin, Transcript, TranscriptEntry};
pub use transport::protocol::TranscriptRole;
pub use transport::{ConnectionState, Transport, TransportEvent};
