use serde::{Deserialize, Serialize};

use super::{
    AudioFormat, InputAudioTranscription, MaxTokens, Modality, Temperature, TurnDetection, Voice,
    text_and_audio,
};

/// Session parameters sent once, in the `session.update` that opens a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    /// The interviewer persona. Immutable for the lifetime of a session.
    pub instructions: String,
    pub voice: Voice,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: Option<InputAudioTranscription>,
    pub turn_detection: Option<TurnDetection>,
    pub temperature: Temperature,
    pub max_response_output_tokens: MaxTokens,
}

impl SessionConfig {
    #[must_use]
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            modalities: text_and_audio(),
            instructions: instructions.into(),
            voice: Voice::default(),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: Some(InputAudioTranscription::default()),
            turn_detection: Some(TurnDetection::server_vad_default()),
            temperature: Temperature::default(),
            max_response_output_tokens: MaxTokens::default(),
        }
    }
}

/// Session object echoed by the server in `session.created` / `session.updated`.
///
/// Only the fields the client inspects are typed; the rest is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub voice: Option<Voice>,
    #[serde(default)]
    pub expires_at: Option<u64>,
}
