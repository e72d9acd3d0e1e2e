use crate::interview::SessionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("OpenAI API error: {0:?}")]
    Api(ServerError),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Invalid client event: {0}")]
    InvalidClientEvent(String),

    #[error("Credential acquisition failed: {0}")]
    AuthFailure(String),

    #[error("Session negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Transport failure during handshake: {0}")]
    TransportFailure(String),

    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("Playback device unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Malformed server event: {0}")]
    MalformedEvent(String),

    #[error("A session start is already in progress")]
    AlreadyConnecting,

    #[error("Cannot {action} a session in state {from:?}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },

    #[error("Session start was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], suitable for choosing a remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    Negotiation,
    Transport,
    Microphone,
    Playback,
    ConnectionLost,
    MalformedEvent,
    Misuse,
    Cancelled,
    Protocol,
}

impl ErrorKind {
    /// Local device or permission problem (grant access, plug in a device).
    #[must_use]
    pub const fn is_device(self) -> bool {
        matches!(self, Self::Microphone | Self::Playback)
    }

    /// Network or remote endpoint problem (retry the connection).
    #[must_use]
    pub const fn is_network(self) -> bool {
        matches!(
            self,
            Self::Auth | Self::Negotiation | Self::Transport | Self::ConnectionLost
        )
    }

    /// Whether this kind ends the session.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::MalformedEvent | Self::Misuse)
    }
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthFailure(_) => ErrorKind::Auth,
            Self::NegotiationFailure(_) => ErrorKind::Negotiation,
            Self::TransportFailure(_)
            | Self::WebSocket(_)
            | Self::Http(_)
            | Self::ConnectionClosed => ErrorKind::Transport,
            Self::MicrophoneUnavailable(_) => ErrorKind::Microphone,
            Self::PlaybackUnavailable(_) => ErrorKind::Playback,
            Self::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Self::MalformedEvent(_) => ErrorKind::MalformedEvent,
            Self::AlreadyConnecting | Self::InvalidTransition { .. } => ErrorKind::Misuse,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Serialization(_)
            | Self::Url(_)
            | Self::Header(_)
            | Self::Api(_)
            | Self::InvalidClientEvent(_) => ErrorKind::Protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_and_network_kinds_are_distinct() {
        let mic = Error::MicrophoneUnavailable("permission denied".to_string());
        assert!(mic.kind().is_device());
        assert!(!mic.kind().is_network());

        let lost = Error::ConnectionLost("reset by peer".to_string());
        assert!(lost.kind().is_network());
        assert!(!lost.kind().is_device());
    }

    #[test]
    fn misuse_is_not_fatal() {
        assert!(!Error::AlreadyConnecting.kind().is_fatal());
        assert!(!Error::MalformedEvent("bad".to_string()).kind().is_fatal());
        assert!(Error::AuthFailure("401".to_string()).kind().is_fatal());
    }

    #[test]
    fn server_error_parses_unknown_type() {
        let err: ServerError = serde_json::from_str(
            r#"{"type":"something_new","code":null,"message":"boom","param":null,"event_id":null}"#,
        )
        .unwrap();
        assert_eq!(err.error_type, ApiErrorType::Unknown);
        assert_eq!(err.message, "boom");
    }
}
