#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod error;
pub mod interview;
pub mod protocol;
pub mod transport;

pub use error::{Error, ErrorKind, Result, ServerError};
pub use interview::{
    ChannelMicrophone, ChannelPlayback, Classified, Connector, CredentialProvider, EventHandlers,
    InterviewPrompt, InterviewSession, InterviewSessionBuilder, MediaPipeline, Microphone,
    Negotiated, Negotiator, OpenAiClientSecrets, PcmFrame, PlaybackSink, SessionEvent,
    SessionFailure, SessionState, Speaker, SpeechOutputTracker, SpeechSignal, TokenEndpoint,
    Transcript, TranscriptAssembler, Transport, Utterance, WsConnector, classify, encode_pcm16,
};
pub use protocol::client_events::ClientEvent;
pub use protocol::models::{
    AudioFormat, InputAudioTranscription, MaxTokens, Modality, SessionConfig, Temperature,
    TurnDetection, Voice,
};
pub use protocol::server_events::ServerEvent;
pub use transport::rest::ClientSecret;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use transport::ws::WsStream;

const TRACE_LOG_MAX_BYTES: usize = 1024;
const MAX_INPUT_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// A WebSocket connection to the Realtime API speaking typed events.
///
/// Thread safety: `RealtimeClient` is `Send` but not `Sync` because the underlying
/// WebSocket stream is not `Sync`.
#[must_use]
pub struct RealtimeClient {
    stream: WsStream,
}

impl RealtimeClient {
    /// Connect to a realtime endpoint with a short-lived bearer credential.
    ///
    /// # Errors
    /// Returns an error if the connection fails or if the URL is invalid.
    pub async fn connect(base_url: &str, bearer: &str, model: &str) -> Result<Self> {
        let stream = transport::ws::connect(base_url, bearer, model).await?;
        Ok(Self { stream })
    }

    /// Send a client event to the server.
    ///
    /// # Errors
    /// Returns an error if validation or serialization fails, or if the WebSocket send fails.
    pub async fn send(&mut self, event: ClientEvent) -> Result<()> {
        validate_client_event(&event)?;
        let json = serde_json::to_string(&event)?;
        tracing::trace!("Sending event: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        self.stream.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Receive the next server event.
    ///
    /// Returns `Ok(None)` once the server closes the connection.
    ///
    /// # Errors
    /// Returns [`Error::MalformedEvent`] for a frame that is not JSON; the
    /// connection stays usable. Any other error means the WebSocket failed.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => {
                    tracing::trace!(
                        "Received event: {}",
                        safe_truncate(&text, TRACE_LOG_MAX_BYTES)
                    );
                    return serde_json::from_str::<ServerEvent>(&text)
                        .map(Some)
                        .map_err(|e| Error::MalformedEvent(e.to_string()));
                }
                Message::Close(_) => {
                    tracing::info!("WebSocket connection closed by server");
                    return Ok(None);
                }
                Message::Ping(payload) => {
                    tracing::debug!("Received Ping, sending Pong");
                    self.stream.send(Message::Pong(payload)).await?;
                }
                _ => (),
            }
        }
        Ok(None)
    }

    /// Send a close frame and flush the socket.
    ///
    /// # Errors
    /// Returns an error if the close handshake cannot be written.
    pub async fn close(&mut self) -> Result<()> {
        self.stream.close().await?;
        Ok(())
    }
}

fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

#[allow(clippy::result_large_err)]
fn validate_client_event(event: &ClientEvent) -> Result<()> {
    match event {
        ClientEvent::InputAudioBufferAppend { audio, .. } => validate_audio_chunk(audio),
        ClientEvent::SessionUpdate { session, .. } if session.instructions.trim().is_empty() => Err(
            Error::InvalidClientEvent("session.update requires non-empty instructions".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Outbound audio must be whole PCM16 samples within the server's chunk limit.
#[allow(clippy::result_large_err)]
fn validate_audio_chunk(audio: &str) -> Result<()> {
    if audio.len() / 4 * 3 > MAX_INPUT_AUDIO_CHUNK_BYTES {
        return Err(Error::InvalidClientEvent(format!(
            "input_audio_buffer.append exceeds 15MB ({} encoded bytes)",
            audio.len()
        )));
    }
    let bytes = BASE64
        .decode(audio)
        .map_err(|e| Error::InvalidClientEvent(format!("input_audio_buffer.append: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(Error::InvalidClientEvent(format!(
            "input_audio_buffer.append carries a partial sample ({} bytes)",
            bytes.len()
        )));
    }
    Ok(())
}
