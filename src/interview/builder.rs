use super::credentials::CredentialProvider;
use super::handlers::{Emitter, EventHandlers, SessionEvent};
use super::media::{MediaPipeline, Microphone, PlaybackSink};
use super::negotiator::{DEFAULT_NEGOTIATION_TIMEOUT, Negotiator};
use super::prompt::InterviewPrompt;
use super::session::InterviewSession;
use super::transport::{Connector, WsConnector};
use crate::protocol::models::{DEFAULT_MODEL, SessionConfig, Temperature, TurnDetection, Voice};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Configures an [`InterviewSession`].
///
/// Credentials, both audio devices and a prompt are required; everything
/// else has a default.
#[must_use]
pub struct InterviewSessionBuilder {
    credentials: Option<Arc<dyn CredentialProvider>>,
    connector: Arc<dyn Connector>,
    microphone: Option<Box<dyn Microphone>>,
    playback: Option<Box<dyn PlaybackSink>>,
    system_prompt: Option<String>,
    model: String,
    voice: Voice,
    temperature: Temperature,
    turn_detection: Option<TurnDetection>,
    greet_first: bool,
    negotiation_timeout: Duration,
    speech_silence_window: Option<Duration>,
    handlers: EventHandlers,
}

impl Default for InterviewSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InterviewSessionBuilder {
    pub fn new() -> Self {
        Self {
            credentials: None,
            connector: Arc::new(WsConnector::new()),
            microphone: None,
            playback: None,
            system_prompt: None,
            model: DEFAULT_MODEL.to_string(),
            voice: Voice::default(),
            temperature: Temperature::default(),
            turn_detection: Some(TurnDetection::server_vad_default()),
            greet_first: true,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            speech_silence_window: None,
            handlers: EventHandlers::new(),
        }
    }

    pub fn credentials(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.credentials = Some(Arc::new(provider));
        self
    }

    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn microphone(mut self, microphone: impl Microphone + 'static) -> Self {
        self.microphone = Some(Box::new(microphone));
        self
    }

    pub fn playback(mut self, playback: impl PlaybackSink + 'static) -> Self {
        self.playback = Some(Box::new(playback));
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Use the mock-interviewer persona for this role and candidate.
    pub fn interview(self, prompt: &InterviewPrompt) -> Self {
        self.system_prompt(prompt.render())
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn voice(mut self, voice: impl Into<Voice>) -> Self {
        self.voice = voice.into();
        self
    }

    pub const fn temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = temperature;
        self
    }

    /// `None` disables server-side turn detection.
    pub fn turn_detection(mut self, turn_detection: Option<TurnDetection>) -> Self {
        self.turn_detection = turn_detection;
        self
    }

    /// Ask the interviewer to open the conversation. On by default.
    pub const fn greet_first(mut self, greet_first: bool) -> Self {
        self.greet_first = greet_first;
        self
    }

    pub const fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// End the speaking signal after this long without audio. Off by default.
    pub const fn speech_silence_window(mut self, window: Option<Duration>) -> Self {
        self.speech_silence_window = window;
        self
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.handlers = self.handlers.on_event(f);
        self
    }

    pub fn handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// # Errors
    /// Returns [`Error::InvalidClientEvent`] naming the first missing or
    /// empty required setting.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<InterviewSession> {
        let credentials = self.credentials.ok_or_else(|| missing("credentials"))?;
        let microphone = self.microphone.ok_or_else(|| missing("microphone"))?;
        let playback = self.playback.ok_or_else(|| missing("playback"))?;
        let system_prompt = self
            .system_prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| missing("system_prompt"))?;

        let mut config = SessionConfig::new(system_prompt);
        config.voice = self.voice;
        config.temperature = self.temperature;
        config.turn_detection = self.turn_detection;

        let negotiator = Negotiator::new(credentials, self.connector, self.model, config)
            .greet_first(self.greet_first)
            .timeout(self.negotiation_timeout);
        let media = MediaPipeline::new(microphone, playback, self.speech_silence_window);

        Ok(InterviewSession::from_parts(
            negotiator,
            media,
            Emitter::new(self.handlers),
        ))
    }
}

fn missing(field: &str) -> Error {
    Error::InvalidClientEvent(format!("interview session requires {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::media::{ChannelMicrophone, ChannelPlayback};
    use crate::interview::session::SessionState;
    use crate::transport::rest::ClientSecret;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NoSecret;

    #[async_trait]
    impl CredentialProvider for NoSecret {
        async fn fetch(&self) -> Result<ClientSecret> {
            Err(Error::AuthFailure("unused".to_string()))
        }
    }

    fn devices() -> (ChannelMicrophone, ChannelPlayback) {
        let (_mic_tx, mic_rx) = mpsc::channel(1);
        let (play_tx, _play_rx) = mpsc::channel(1);
        (ChannelMicrophone::new(mic_rx), ChannelPlayback::new(play_tx))
    }

    #[test]
    fn build_names_missing_settings() {
        let err = InterviewSession::builder().build().unwrap_err();
        assert!(err.to_string().contains("credentials"));

        let (mic, playback) = devices();
        let err = InterviewSession::builder()
            .credentials(NoSecret)
            .microphone(mic)
            .playback(playback)
            .system_prompt("   ")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("system_prompt"));
    }

    #[test]
    fn built_session_is_idle_with_prompt() {
        let (mic, playback) = devices();
        let session = InterviewSession::builder()
            .credentials(NoSecret)
            .connector(WsConnector::with_base_url("ws://127.0.0.1:9"))
            .microphone(mic)
            .playback(playback)
            .interview(&InterviewPrompt::new("Data engineer"))
            .voice("verse")
            .build()
            .unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.transcript().is_empty());
        assert!(session.system_prompt().contains("Data engineer"));
    }
}
