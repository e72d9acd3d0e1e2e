use serde::{Deserialize, Deserializer};
use serde_json::Value;
use super::models::Session;
use crate::error::ServerError;

/// Server events relevant to a voice interview.
///
/// Beta event names are canonical; the GA names are accepted as aliases.
/// Anything else parses as [`ServerEvent::Unknown`] so new event kinds never
/// break the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Error {
        event_id: String,
        error: ServerError,
    },
    SessionCreated {
        event_id: String,
        session: Session,
    },
    SessionUpdated {
        event_id: String,
        session: Session,
    },
    ConversationItemCreated {
        event_id: String,
        previous_item_id: Option<String>,
        item: Value,
    },
    InputAudioBufferCommitted {
        event_id: String,
        previous_item_id: Option<String>,
        item_id: String,
    },
    InputAudioBufferSpeechStarted {
        event_id: String,
        audio_start_ms: u32,
        item_id: String,
    },
    InputAudioBufferSpeechStopped {
        event_id: String,
        audio_end_ms: u32,
        item_id: String,
    },
    InputAudioTranscriptionCompleted {
        event_id: String,
        item_id: String,
        content_index: u32,
        transcript: String,
    },
    InputAudioTranscriptionFailed {
        event_id: String,
        item_id: String,
        content_index: u32,
        error: ServerError,
    },
    ResponseCreated {
        event_id: String,
        response_id: String,
    },
    ResponseDone {
        event_id: String,
        response_id: String,
    },
    ResponseAudioTranscriptDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        delta: String,
    },
    ResponseAudioTranscriptDone {
        event_id: String,
        response_id: String,
        item_id: String,
        transcript: String,
    },
    ResponseAudioDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        delta: String,
    },
    ResponseAudioDone {
        event_id: String,
        response_id: String,
        item_id: String,
    },
    RateLimitsUpdated {
        event_id: String,
        rate_limits: Vec<RateLimit>,
    },
    Unknown(Value),
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseRef {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: String,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        event_id: String,
        session: Session,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        event_id: String,
        session: Session,
    },
    #[serde(rename = "conversation.item.created", alias = "conversation.item.added")]
    ConversationItemCreated {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        previous_item_id: Option<String>,
        item: Value,
    },
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        previous_item_id: Option<String>,
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        audio_start_ms: u32,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        audio_end_ms: u32,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        content_index: u32,
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        content_index: u32,
        error: ServerError,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        event_id: String,
        response: ResponseRef,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        event_id: String,
        response: ResponseRef,
    },
    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.output_audio_transcript.delta"
    )]
    ResponseAudioTranscriptDelta {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        delta: String,
    },
    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    ResponseAudioTranscriptDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    ResponseAudioDelta {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.audio.done", alias = "response.output_audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { event_id, session } => Self::SessionCreated { event_id, session },
            ServerEventRepr::SessionUpdated { event_id, session } => Self::SessionUpdated { event_id, session },
            ServerEventRepr::ConversationItemCreated { event_id, previous_item_id, item } => Self::ConversationItemCreated { event_id, previous_item_id, item },
            ServerEventRepr::InputAudioBufferCommitted { event_id, previous_item_id, item_id } => Self::InputAudioBufferCommitted { event_id, previous_item_id, item_id },
            ServerEventRepr::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id } => Self::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id },
            ServerEventRepr::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id } => Self::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id },
            ServerEventRepr::InputAudioTranscriptionCompleted { event_id, item_id, content_index, transcript } => Self::InputAudioTranscriptionCompleted { event_id, item_id, content_index, transcript },
            ServerEventRepr::InputAudioTranscriptionFailed { event_id, item_id, content_index, error } => Self::InputAudioTranscriptionFailed { event_id, item_id, content_index, error },
            ServerEventRepr::ResponseCreated { event_id, response } => Self::ResponseCreated { event_id, response_id: response.id },
            ServerEventRepr::ResponseDone { event_id, response } => Self::ResponseDone { event_id, response_id: response.id },
            ServerEventRepr::ResponseAudioTranscriptDelta { event_id, response_id, item_id, delta } => Self::ResponseAudioTranscriptDelta { event_id, response_id, item_id, delta },
            ServerEventRepr::ResponseAudioTranscriptDone { event_id, response_id, item_id, transcript } => Self::ResponseAudioTranscriptDone { event_id, response_id, item_id, transcript },
            ServerEventRepr::ResponseAudioDelta { event_id, response_id, item_id, delta } => Self::ResponseAudioDelta { event_id, response_id, item_id, delta },
            ServerEventRepr::ResponseAudioDone { event_id, response_id, item_id } => Self::ResponseAudioDone { event_id, response_id, item_id },
            ServerEventRepr::RateLimitsUpdated { event_id, rate_limits } => Self::RateLimitsUpdated { event_id, rate_limits },
        }
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match ServerEventRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Failed to parse ServerEvent: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

impl ServerEvent {
    /// Wire `type` tag, or `"<untyped>"` for payloads that carry none.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Error { .. } => "error",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::ConversationItemCreated { .. } => "conversation.item.created",
            Self::InputAudioBufferCommitted { .. } => "input_audio_buffer.committed",
            Self::InputAudioBufferSpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::InputAudioBufferSpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            Self::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            Self::InputAudioTranscriptionFailed { .. } => {
                "conversation.item.input_audio_transcription.failed"
            }
            Self::ResponseCreated { .. } => "response.created",
            Self::ResponseDone { .. } => "response.done",
            Self::ResponseAudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            Self::ResponseAudioTranscriptDone { .. } => "response.audio_transcript.done",
            Self::ResponseAudioDelta { .. } => "response.audio.delta",
            Self::ResponseAudioDone { .. } => "response.audio.done",
            Self::RateLimitsUpdated { .. } => "rate_limits.updated",
            Self::Unknown(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("<untyped>"),
        }
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Error { event_id, .. }
            | Self::SessionCreated { event_id, .. }
            | Self::SessionUpdated { event_id, .. }
            | Self::ConversationItemCreated { event_id, .. }
            | Self::InputAudioBufferCommitted { event_id, .. }
            | Self::InputAudioBufferSpeechStarted { event_id, .. }
            | Self::InputAudioBufferSpeechStopped { event_id, .. }
            | Self::InputAudioTranscriptionCompleted { event_id, .. }
            | Self::InputAudioTranscriptionFailed { event_id, .. }
            | Self::ResponseCreated { event_id, .. }
            | Self::ResponseDone { event_id, .. }
            | Self::ResponseAudioTranscriptDelta { event_id, .. }
            | Self::ResponseAudioTranscriptDone { event_id, .. }
            | Self::ResponseAudioDelta { event_id, .. }
            | Self::ResponseAudioDone { event_id, .. }
            | Self::RateLimitsUpdated { event_id, .. } => Some(event_id.as_str()),
            Self::Unknown(value) => value.get("event_id").and_then(Value::as_str),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RateLimit {
    pub name: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_seconds: f32,
}
