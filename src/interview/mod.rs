//! A voice mock interview over the realtime API.
//!
//! [`InterviewSession`] ties the pieces together: the [`Negotiator`] opens
//! and configures a [`Transport`], the [`MediaPipeline`] moves audio between
//! the devices and the connection, and the [`TranscriptAssembler`] keeps the
//! running conversation.

pub mod builder;
pub mod credentials;
pub mod dispatch;
pub mod handlers;
pub mod media;
pub mod negotiator;
pub mod prompt;
pub mod session;
pub mod transcript;
pub mod transport;

pub use builder::InterviewSessionBuilder;
pub use credentials::{CredentialProvider, OpenAiClientSecrets, TokenEndpoint};
pub use dispatch::{Classified, classify};
pub use handlers::{EventHandlers, SessionEvent, SessionFailure};
pub use media::{
    ChannelMicrophone, ChannelPlayback, MediaPipeline, Microphone, PcmFrame, PlaybackSink,
    SpeechOutputTracker, SpeechSignal, encode_pcm16,
};
pub use negotiator::{DEFAULT_NEGOTIATION_TIMEOUT, Negotiated, Negotiator};
pub use prompt::InterviewPrompt;
pub use session::{InterviewSession, SessionState};
pub use transcript::{Speaker, Transcript, TranscriptAssembler, Utterance};
pub use transport::{BoxFuture, Connector, Transport, WsConnector};
