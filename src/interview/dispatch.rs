//! Routes server events to the transcript, the audio pipeline and the caller.

use super::handlers::{Emitter, SessionEvent};
use super::media::{MediaPipeline, SpeechSignal};
use super::transcript::TranscriptAssembler;
use crate::error::ServerError;
use crate::protocol::server_events::ServerEvent;
use crate::Result;
use tracing::{debug, trace, warn};

/// What a server event means to an interview session.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    AssistantTextDelta(String),
    UserTextFinal(String),
    /// Base64 PCM16.
    AudioOutputDelta(String),
    AudioOutputDone,
    ServerError(ServerError),
    /// A known event the session has no use for.
    Ignored(String),
    Unrecognized(String),
}

#[must_use]
pub fn classify(event: ServerEvent) -> Classified {
    match event {
        ServerEvent::ResponseAudioTranscriptDelta { delta, .. } => {
            Classified::AssistantTextDelta(delta)
        }
        ServerEvent::InputAudioTranscriptionCompleted { transcript, .. } => {
            Classified::UserTextFinal(transcript)
        }
        ServerEvent::ResponseAudioDelta { delta, .. } => Classified::AudioOutputDelta(delta),
        ServerEvent::ResponseAudioDone { .. } => Classified::AudioOutputDone,
        ServerEvent::Error { error, .. }
        | ServerEvent::InputAudioTranscriptionFailed { error, .. } => {
            Classified::ServerError(error)
        }
        unknown @ ServerEvent::Unknown(_) => Classified::Unrecognized(unknown.kind().to_string()),
        other => Classified::Ignored(other.kind().to_string()),
    }
}

/// Single ordered consumer of server events for one session.
pub(crate) struct Dispatcher {
    assembler: TranscriptAssembler,
    emitter: Emitter,
}

impl Dispatcher {
    pub(crate) const fn new(assembler: TranscriptAssembler, emitter: Emitter) -> Self {
        Self { assembler, emitter }
    }

    /// # Errors
    /// Only a playback failure is returned; everything else is absorbed.
    pub(crate) async fn dispatch(
        &mut self,
        event: ServerEvent,
        media: &mut MediaPipeline,
    ) -> Result<()> {
        match classify(event) {
            Classified::AssistantTextDelta(delta) => {
                self.assembler.on_assistant_delta(&delta);
                if !delta.is_empty() {
                    self.emitter.emit(SessionEvent::AssistantTextDelta { delta });
                }
            }
            Classified::UserTextFinal(text) => {
                self.assembler.on_user_final(&text);
                self.emitter.emit(SessionEvent::UserTextFinal { text });
            }
            Classified::AudioOutputDelta(b64) => {
                let (bytes, signal) = media.play_chunk(&b64).await?;
                self.speech(signal);
                self.emitter.emit(SessionEvent::AudioOutputDelta { bytes });
            }
            Classified::AudioOutputDone => {
                self.emitter.emit(SessionEvent::AudioOutputDone);
                let signal = media.audio_done();
                self.speech(signal);
            }
            Classified::ServerError(error) => {
                warn!(code = ?error.code, "server error: {}", error.message);
                self.emitter.emit(SessionEvent::ServerError {
                    code: error.code,
                    message: error.message,
                });
            }
            Classified::Ignored(kind) => trace!("ignoring {kind}"),
            Classified::Unrecognized(kind) => debug!("dropping unrecognized event {kind}"),
        }
        Ok(())
    }

    pub(crate) fn speech(&self, signal: Option<SpeechSignal>) {
        match signal {
            Some(SpeechSignal::Started) => {
                debug!("assistant started speaking");
                self.emitter.emit(SessionEvent::SpeechOutputStarted);
            }
            Some(SpeechSignal::Ended) => {
                debug!("assistant stopped speaking");
                self.emitter.emit(SessionEvent::SpeechOutputEnded);
            }
            None => {}
        }
    }

    pub(crate) fn close_transcript(&mut self) {
        self.assembler.close();
    }
}
