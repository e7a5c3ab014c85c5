//! Error types for the Lyra voice client

use thiserror::Error;

/// Result type alias for Lyra operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied by the platform
    #[error("microphone permission error: {0}")]
    Permission(String),

    /// Audio hardware failure (device missing, stream build failed)
    #[error("audio device error: {0}")]
    Device(String),

    /// Transport handshake or connection failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Outbound send attempted without an open transport
    #[error("send error: {0}")]
    Send(String),

    /// Unexpected message shape from the remote endpoint
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error ends the session.
    ///
    /// Fatal errors are reported to the session owner and drive the
    /// conversation state back to idle. Everything else is contained where
    /// it occurred: a bad inbound chunk is dropped, a send without an open
    /// connection is discarded, a malformed frame is ignored.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Permission(_) | Self::Device(_) | Self::Connection(_) | Self::WebSocket(_)
        )
    }

    /// Short category label for failure reporting
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Permission(_) => "permission",
            Self::Device(_) => "device",
            Self::Connection(_) => "connection",
            Self::Decode(_) => "decode",
            Self::Send(_) => "send",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
            Self::WebSocket(_) => "websocket",
            Self::Serialization(_) => "serialization",
            Self::Toml(_) => "toml",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_splits_taxonomy() {
        assert!(Error::Permission("denied".into()).is_fatal());
        assert!(Error::Device("no input device".into()).is_fatal());
        assert!(Error::Connection("handshake failed".into()).is_fatal());
        assert!(!Error::Decode("odd byte length".into()).is_fatal());
        assert!(!Error::Send("transport not open".into()).is_fatal());
        assert!(!Error::Protocol("unknown frame".into()).is_fatal());
    }
}
