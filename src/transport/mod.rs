//! Persistent WebSocket session with the speech endpoint
//!
//! One connection per conversation. The socket splits into a reader task
//! that turns wire frames into [`TransportEvent`]s and a writer task fed by
//! a bounded channel. Connection failures are terminal for the session:
//! there is no automatic retry, the caller decides whether to start over.

pub mod protocol;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::audio::batcher::OutboundPayload;
use crate::audio::AudioFormat;
use crate::config::EndpointConfig;
use crate::transport::protocol::{decode_audio, ClientFrame, ServerFrame, TranscriptRole};
use crate::{Error, Result};

/// Writer backlog; sends beyond this are dropped, not queued forever
const OUTBOUND_BACKLOG: usize = 32;

/// How long `close` waits for the writer to flush its close frame
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Connection lifecycle, observable via [`Transport::state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Everything the endpoint tells us, in arrival order
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake finished and the setup frame is on the wire
    Opened,
    /// Inbound audio, base64 already removed
    Audio { format: AudioFormat, data: Vec<u8> },
    /// Transcript line for one side of the conversation
    Transcript { role: TranscriptRole, text: String },
    /// The remote speaker finished its turn
    TurnComplete,
    /// In-band error frame from the endpoint
    ServerError { code: String, message: String },
    /// The connection ended cleanly
    Closed { code: Option<u16>, reason: String },
    /// The connection failed mid-session
    Failed(String),
}

/// WebSocket session handle owned by the conversation loop
pub struct Transport {
    state: ConnectionState,
    outbound: Option<mpsc::Sender<ClientFrame>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Transport {
    /// Create a disconnected transport
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            outbound: None,
            reader: None,
            writer: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether sends are currently possible
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open)
    }

    /// Connect, announce the session, and start the reader/writer tasks
    ///
    /// `Opened` is emitted on `events` before any inbound event. No retry
    /// happens on failure; the transport returns to disconnected and the
    /// error is the caller's to report.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the URL is invalid or the handshake or
    /// setup send fails.
    pub async fn connect(
        &mut self,
        endpoint: &EndpointConfig,
        input_format: AudioFormat,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        if !matches!(self.state, ConnectionState::Disconnected) {
            return Err(Error::Connection(format!(
                "connect while {:?}",
                self.state
            )));
        }

        self.state = ConnectionState::Connecting;

        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| self.connect_failed(format!("invalid endpoint url: {e}")))?;

        if let Some(key) = endpoint.api_key.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| self.connect_failed(format!("invalid api key header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| self.connect_failed(format!("handshake failed: {e}")))?;

        tracing::info!(url = %endpoint.url, "connected to speech endpoint");

        let (mut sink, stream) = socket.split();

        let setup = serde_json::to_string(&ClientFrame::setup(endpoint, input_format))
            .map_err(|e| self.connect_failed(format!("setup frame serialization failed: {e}")))?;
        sink.send(Message::Text(setup))
            .await
            .map_err(|e| self.connect_failed(format!("setup send failed: {e}")))?;

        if events.send(TransportEvent::Opened).await.is_err() {
            return Err(self.connect_failed("session event channel closed".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel::<ClientFrame>(OUTBOUND_BACKLOG);
        self.writer = Some(tokio::spawn(write_loop(sink, outbound_rx)));
        self.reader = Some(tokio::spawn(read_loop(stream, events)));
        self.outbound = Some(outbound_tx);
        self.state = ConnectionState::Open;

        Ok(())
    }

    /// Queue a flushed audio batch for sending
    ///
    /// # Errors
    ///
    /// Returns a send error when the transport is not open or the writer
    /// backlog is full. Either way the payload is dropped; send errors are
    /// contained, not session-fatal.
    pub fn send(&self, payload: &OutboundPayload) -> Result<()> {
        self.queue(ClientFrame::audio(payload))
    }

    /// Queue typed user text for sending
    ///
    /// # Errors
    ///
    /// Same rules as [`send`](Self::send).
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.queue(ClientFrame::Text {
            text: text.to_string(),
        })
    }

    fn queue(&self, frame: ClientFrame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Send(format!(
                "transport not open ({:?})",
                self.state
            )));
        }

        let Some(outbound) = self.outbound.as_ref() else {
            return Err(Error::Send("writer not running".to_string()));
        };

        match outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(Error::Send("outbound backlog full, frame dropped".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Send("writer task ended".to_string()))
            }
        }
    }

    /// Close the connection and stop both tasks
    ///
    /// Idempotent: closing a disconnected transport does nothing. The writer
    /// gets a short grace period to put a close frame on the wire.
    pub async fn close(&mut self) {
        if matches!(self.state, ConnectionState::Disconnected) {
            return;
        }

        self.state = ConnectionState::Closing;
        self.outbound = None;

        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                writer.abort();
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        self.state = ConnectionState::Disconnected;
        tracing::debug!("transport closed");
    }

    fn connect_failed(&mut self, message: String) -> Error {
        self.state = ConnectionState::Disconnected;
        Error::Connection(message)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsStream = futures::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Forward queued frames to the socket; on shutdown, leave a close frame
async fn write_loop(mut sink: WsSink, mut outbound: mpsc::Receiver<ClientFrame>) {
    while let Some(frame) = outbound.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "outbound frame serialization failed, dropped");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            tracing::warn!(error = %e, "outbound send failed, writer stopping");
            return;
        }
    }

    // Channel closed: the transport is closing, say goodbye best-effort
    let _ = sink.send(Message::Close(None)).await;
}

/// Parse inbound messages into transport events until the connection ends
async fn read_loop(mut stream: WsStream, events: mpsc::Sender<TransportEvent>) {
    let terminal = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(event) = parse_frame(&text) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.to_string())
                });
                break TransportEvent::Closed { code, reason };
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break TransportEvent::Failed(e.to_string()),
            None => {
                break TransportEvent::Closed {
                    code: None,
                    reason: "connection ended".to_string(),
                }
            }
        }
    };

    let _ = events.send(terminal).await;
}

/// Map one wire frame to at most one event
///
/// Malformed frames and payloads are logged and ignored; the read loop
/// carries on regardless of what the endpoint sends.
fn parse_frame(text: &str) -> Option<TransportEvent> {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "unrecognized frame ignored");
            return None;
        }
    };

    match frame {
        ServerFrame::Audio { mime_type, data } => match decode_audio(&mime_type, &data) {
            Ok((format, bytes)) => Some(TransportEvent::Audio {
                format,
                data: bytes,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "inbound audio frame dropped");
                None
            }
        },
        ServerFrame::Transcript { role, text } => Some(TransportEvent::Transcript { role, text }),
        ServerFrame::TurnComplete => Some(TransportEvent::TurnComplete),
        ServerFrame::Error { code, message } => {
            Some(TransportEvent::ServerError { code, message })
        }
    }
}
