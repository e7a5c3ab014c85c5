//! Conversation session - the voice loop
//!
//! One event loop owns the microphone, the transport, the outbound batcher,
//! and the playback queue. Every state transition runs inside it, so no two
//! handlers ever interleave.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio::batcher::OutboundBatcher;
use crate::audio::capture::{CpalMic, MicSource};
use crate::audio::pcm;
use crate::audio::playback::{AudioSink, Speaker};
use crate::audio::queue::PlaybackQueue;
use crate::audio::AudioFormat;
use crate::config::Config;
use crate::transcript::{Origin, Transcript, TranscriptEntry};
use crate::transport::{Transport, TransportEvent};
use crate::{Error, Result};

/// Command backlog from the session owner
const COMMAND_BACKLOG: usize = 8;

/// Capture frames in flight between the microphone and the loop
const FRAME_BACKLOG: usize = 8;

/// Transport events in flight between the reader task and the loop
const EVENT_BACKLOG: usize = 32;

/// Playback completion signals in flight
const DONE_BACKLOG: usize = 4;

/// Whose turn it is, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// No active conversation
    Idle,
    /// Microphone is live, waiting for the remote speaker
    Listening,
    /// Acquiring the microphone and connecting
    Processing,
    /// Remote audio is playing
    Speaking,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// User intent delivered through a [`SessionHandle`]
#[derive(Debug)]
pub enum SessionCommand {
    /// Begin a conversation: acquire the microphone and connect
    Start,
    /// End the conversation and release everything
    Stop,
    /// Send typed text alongside the audio stream
    SendText(String),
}

/// What the session reports to its owner
#[derive(Debug)]
pub enum Notification {
    /// The conversation state changed
    StateChanged(ConversationState),
    /// A transcript entry was appended
    Message(TranscriptEntry),
    /// A session-fatal error; the state has returned to idle
    Failure {
        kind: &'static str,
        message: String,
    },
}

/// Cloneable command handle for a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Ask the session to start a conversation
    ///
    /// # Errors
    ///
    /// Returns a send error if the session loop has stopped.
    pub async fn start(&self) -> Result<()> {
        self.send(SessionCommand::Start).await
    }

    /// Ask the session to end the conversation and go idle
    ///
    /// # Errors
    ///
    /// Returns a send error if the session loop has stopped.
    pub async fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop).await
    }

    /// Send typed text to the remote endpoint
    ///
    /// # Errors
    ///
    /// Returns a send error if the session loop has stopped.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(SessionCommand::SendText(text.to_string())).await
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Send("session loop stopped".to_string()))
    }
}

/// The conversation session
///
/// Owns every mutable piece of session state. [`Session::run`] consumes the
/// session and processes commands, capture frames, transport events, and
/// playback completions one at a time until every [`SessionHandle`] is
/// dropped.
pub struct Session {
    config: Config,
    state: ConversationState,
    mic: Box<dyn MicSource>,
    sink: Box<dyn AudioSink>,
    transport: Transport,
    batcher: OutboundBatcher,
    queue: PlaybackQueue,
    transcript: Transcript,
    commands: mpsc::Receiver<SessionCommand>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl Session {
    /// Create a session over the default microphone and speaker
    #[must_use]
    pub fn new(config: Config) -> (Self, SessionHandle, mpsc::UnboundedReceiver<Notification>) {
        let mic = Box::new(CpalMic::new(config.capture.clone()));
        let sink = Box::new(Speaker::new(&config.playback));
        Self::with_io(config, mic, sink)
    }

    /// Create a session over caller-supplied audio endpoints
    #[must_use]
    pub fn with_io(
        config: Config,
        mic: Box<dyn MicSource>,
        sink: Box<dyn AudioSink>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<Notification>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BACKLOG);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let input_format = AudioFormat::pcm(config.capture.sample_rate);
        let batcher = OutboundBatcher::new(&config.batch, input_format);
        let queue = PlaybackQueue::new(sink.sample_rate());

        let session = Self {
            config,
            state: ConversationState::Idle,
            mic,
            sink,
            transport: Transport::new(),
            batcher,
            queue,
            transcript: Transcript::new(),
            commands: command_rx,
            notifications: notify_tx,
        };

        (session, SessionHandle { commands: command_tx }, notify_rx)
    }

    /// Current conversation state
    #[must_use]
    pub const fn state(&self) -> ConversationState {
        self.state
    }

    /// The append-only transcript accumulated so far
    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run the session loop until every command handle is dropped
    ///
    /// Must run where the audio streams were created; cpal streams are not
    /// `Send`, so the loop stays on the caller's thread.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for fatal setup
    /// errors surfacing here.
    #[allow(clippy::future_not_send)]
    pub async fn run(mut self) -> Result<()> {
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(FRAME_BACKLOG);
        let (event_tx, mut event_rx) = mpsc::channel::<TransportEvent>(EVENT_BACKLOG);
        let (done_tx, mut done_rx) = mpsc::channel::<()>(DONE_BACKLOG);

        let mut flush = tokio::time::interval(Duration::from_millis(
            self.config.batch.flush_interval_ms.max(1),
        ));
        // Skip the first immediate tick
        flush.tick().await;

        tracing::info!("session loop running");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Start) => self.handle_start(&frame_tx, &event_tx).await,
                    Some(SessionCommand::Stop) => self.handle_stop().await,
                    Some(SessionCommand::SendText(text)) => self.handle_send_text(&text),
                    None => break,
                },
                Some(frame) = frame_rx.recv() => self.handle_frame(&frame),
                Some(event) = event_rx.recv() => self.handle_transport_event(event, &done_tx).await,
                Some(()) = done_rx.recv() => self.handle_playback_done(&done_tx).await,
                _ = flush.tick() => self.flush_pending(),
            }
        }

        if self.state != ConversationState::Idle {
            self.teardown().await;
            self.set_state(ConversationState::Idle);
        }

        tracing::info!("session loop stopped");
        Ok(())
    }

    #[allow(clippy::future_not_send)]
    async fn handle_start(
        &mut self,
        frames: &mpsc::Sender<Vec<f32>>,
        events: &mpsc::Sender<TransportEvent>,
    ) {
        if self.state != ConversationState::Idle {
            tracing::debug!(state = %self.state, "start ignored");
            return;
        }

        self.set_state(ConversationState::Processing);

        if let Err(e) = self.mic.start(frames.clone()) {
            self.fail(&e).await;
            return;
        }

        let input_format = AudioFormat::pcm(self.config.capture.sample_rate);
        if let Err(e) = self
            .transport
            .connect(&self.config.endpoint, input_format, events.clone())
            .await
        {
            self.fail(&e).await;
        }
    }

    #[allow(clippy::future_not_send)]
    async fn handle_stop(&mut self) {
        if self.state == ConversationState::Idle {
            return;
        }

        tracing::info!("conversation stopped by user");
        self.teardown().await;
        self.set_state(ConversationState::Idle);
    }

    fn handle_send_text(&mut self, text: &str) {
        if !self.transport.is_open() {
            tracing::warn!("text dropped, connection not open");
            return;
        }

        match self.transport.send_text(text) {
            Ok(()) => {
                let entry = self.transcript.append(Origin::User, text);
                self.notify(Notification::Message(entry));
            }
            Err(e) => tracing::warn!(error = %e, "text dropped"),
        }
    }

    fn handle_frame(&mut self, frame: &[f32]) {
        if self.state == ConversationState::Idle {
            return;
        }

        self.batcher.push(pcm::encode(frame));
        if self.batcher.ready() {
            self.flush_pending();
        }
    }

    fn flush_pending(&mut self) {
        if !self.transport.is_open() || self.batcher.pending_samples() == 0 {
            return;
        }

        if let Some(payload) = self.batcher.flush() {
            if let Err(e) = self.transport.send(&payload) {
                tracing::warn!(error = %e, "outbound audio dropped");
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn handle_transport_event(&mut self, event: TransportEvent, done: &mpsc::Sender<()>) {
        match event {
            TransportEvent::Opened => {
                if self.state == ConversationState::Processing {
                    self.set_state(ConversationState::Listening);
                }
            }
            TransportEvent::Audio { format, data } => {
                if self.state == ConversationState::Idle {
                    return;
                }
                if let Err(e) = self.queue.enqueue(format, &data) {
                    tracing::warn!(error = %e, "inbound audio dropped");
                    return;
                }
                self.start_next_playback(done).await;
            }
            TransportEvent::Transcript { role, text } => {
                let entry = self.transcript.append(Origin::from(role), &text);
                self.notify(Notification::Message(entry));
            }
            TransportEvent::TurnComplete => {
                // Queue drain, not the turn marker, returns the state to
                // listening; trailing audio plays out first.
                tracing::debug!(queued = self.queue.len(), "turn complete");
            }
            TransportEvent::ServerError { code, message } => {
                let error = Error::Connection(format!("server error {code}: {message}"));
                self.fail(&error).await;
            }
            TransportEvent::Closed { code, reason } => {
                if self.state == ConversationState::Idle {
                    return;
                }
                tracing::info!(code = ?code, reason = %reason, "connection closed by remote");
                self.teardown().await;
                self.set_state(ConversationState::Idle);
            }
            TransportEvent::Failed(message) => {
                if self.state == ConversationState::Idle {
                    return;
                }
                self.fail(&Error::Connection(message)).await;
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn handle_playback_done(&mut self, done: &mpsc::Sender<()>) {
        self.queue.finish_current();
        self.start_next_playback(done).await;

        if self.queue.is_idle() && self.state == ConversationState::Speaking {
            tracing::debug!("playback idle");
            self.set_state(ConversationState::Listening);
        }
    }

    #[allow(clippy::future_not_send)]
    async fn start_next_playback(&mut self, done: &mpsc::Sender<()>) {
        let Some(samples) = self.queue.next_to_play() else {
            return;
        };

        let signal = done.clone();
        let result = self.sink.play(
            samples,
            Box::new(move || {
                let _ = signal.try_send(());
            }),
        );

        match result {
            Ok(()) => {
                if self.state == ConversationState::Listening {
                    self.set_state(ConversationState::Speaking);
                }
            }
            Err(e) => self.fail(&e).await,
        }
    }

    #[allow(clippy::future_not_send)]
    async fn fail(&mut self, error: &Error) {
        tracing::error!(error = %error, "session error");
        self.notify(Notification::Failure {
            kind: error.kind(),
            message: error.to_string(),
        });
        self.teardown().await;
        self.set_state(ConversationState::Idle);
    }

    /// Release the microphone, the connection, and any queued playback
    #[allow(clippy::future_not_send)]
    async fn teardown(&mut self) {
        self.mic.stop();
        self.transport.close().await;
        self.queue.clear();
        self.sink.stop();
        let _ = self.batcher.flush();
    }

    fn set_state(&mut self, next: ConversationState) {
        if self.state == next {
            return;
        }

        tracing::info!(from = %self.state, to = %next, "state changed");
        self.state = next;
        self.notify(Notification::StateChanged(next));
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }
}
