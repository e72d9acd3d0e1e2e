pub mod audio;
pub mod common;
pub mod session;

pub use audio::{AudioFormat, InputAudioTranscription, PCM16_SAMPLE_RATE, TurnDetection};
pub use common::{
    DEFAULT_MODEL, DEFAULT_VOICE, Infinite, MaxTokens, Modality, Temperature, TemperatureError,
    Voice, text_and_audio,
};
pub use session::{Session, SessionConfig};
