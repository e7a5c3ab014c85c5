//! Shared test utilities

use base64::Engine as _;
use lyra_voice::Config;
use lyra_voice::audio::pcm;
use lyra_voice::config::{BatchConfig, EndpointConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;

/// Bind a loopback endpoint and accept a single websocket connection
///
/// The returned handle resolves to the server half once a client connects.
pub async fn loopback_endpoint() -> (String, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind loopback listener");
    let addr = listener.local_addr().expect("listener has an address");

    let accept = tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.expect("failed to accept connection");
        tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket handshake")
    });

    (format!("ws://{addr}"), accept)
}

/// Config pointing at a test endpoint, with a fast flush backstop
#[must_use]
pub fn test_config(url: &str) -> Config {
    Config {
        endpoint: EndpointConfig {
            url: url.to_string(),
            ..EndpointConfig::default()
        },
        batch: BatchConfig {
            flush_interval_ms: 50,
            ..BatchConfig::default()
        },
        ..Config::default()
    }
}

/// Build the wire form of an inbound audio frame
#[must_use]
pub fn audio_frame(samples: &[i16], rate: u32) -> String {
    let data = base64::engine::general_purpose::STANDARD.encode(pcm::samples_to_bytes(samples));
    format!(r#"{{"type":"audio","mime_type":"audio/pcm;rate={rate}","data":"{data}"}}"#)
}
