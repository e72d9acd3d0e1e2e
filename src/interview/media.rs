//! Local audio: microphone capture, speaker playback and the speaking signal.

use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One block of mono PCM16 samples at 24 kHz.
pub type PcmFrame = Vec<i16>;

/// An audio capture device.
#[async_trait]
pub trait Microphone: Send {
    /// Acquire the device and start capturing.
    ///
    /// # Errors
    /// Any error (permission denied, no device) is fatal to the session.
    async fn open(&mut self) -> Result<mpsc::Receiver<PcmFrame>>;

    /// Stop capturing and give the device back.
    async fn release(&mut self);
}

/// An audio output device.
#[async_trait]
pub trait PlaybackSink: Send {
    /// # Errors
    /// Any error is fatal to the session.
    async fn open(&mut self) -> Result<()>;

    /// Queue samples for playback, in call order.
    ///
    /// # Errors
    /// Any error is fatal to the session.
    async fn play(&mut self, pcm: &[i16]) -> Result<()>;

    async fn release(&mut self);
}

/// A microphone fed by a caller-owned channel.
#[derive(Debug)]
pub struct ChannelMicrophone {
    source: Option<mpsc::Receiver<PcmFrame>>,
}

impl ChannelMicrophone {
    #[must_use]
    pub const fn new(source: mpsc::Receiver<PcmFrame>) -> Self {
        Self {
            source: Some(source),
        }
    }
}

#[async_trait]
impl Microphone for ChannelMicrophone {
    async fn open(&mut self) -> Result<mpsc::Receiver<PcmFrame>> {
        self.source
            .take()
            .ok_or_else(|| {
                Error::MicrophoneUnavailable("capture source already in use".to_string())
            })
    }

    async fn release(&mut self) {
        self.source = None;
    }
}

/// A playback sink that forwards decoded samples to a caller-owned channel.
#[derive(Debug)]
pub struct ChannelPlayback {
    sink: mpsc::Sender<PcmFrame>,
    open: bool,
}

impl ChannelPlayback {
    #[must_use]
    pub const fn new(sink: mpsc::Sender<PcmFrame>) -> Self {
        Self { sink, open: false }
    }
}

#[async_trait]
impl PlaybackSink for ChannelPlayback {
    async fn open(&mut self) -> Result<()> {
        if self.sink.is_closed() {
            return Err(Error::PlaybackUnavailable("playback receiver dropped".to_string()));
        }
        self.open = true;
        Ok(())
    }

    async fn play(&mut self, pcm: &[i16]) -> Result<()> {
        if !self.open {
            return Err(Error::PlaybackUnavailable("playback not open".to_string()));
        }
        self.sink
            .send(pcm.to_vec())
            .await
            .map_err(|_| Error::PlaybackUnavailable("playback receiver dropped".to_string()))
    }

    async fn release(&mut self) {
        self.open = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechSignal {
    Started,
    Ended,
}

/// Derives "the assistant is speaking" from audio data flow alone.
#[derive(Debug, Clone, Default)]
pub struct SpeechOutputTracker {
    speaking: bool,
    silence_window: Option<Duration>,
    last_chunk_at: Option<Instant>,
}

impl SpeechOutputTracker {
    /// With `Some(window)`, a gap longer than `window` between chunks also
    /// ends the speech.
    #[must_use]
    pub const fn new(silence_window: Option<Duration>) -> Self {
        Self {
            speaking: false,
            silence_window,
            last_chunk_at: None,
        }
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn on_chunk(&mut self, now: Instant) -> Option<SpeechSignal> {
        self.last_chunk_at = Some(now);
        if self.speaking {
            return None;
        }
        self.speaking = true;
        Some(SpeechSignal::Started)
    }

    pub fn on_done(&mut self) -> Option<SpeechSignal> {
        self.stop()
    }

    /// When the silence window runs out, if one is armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if !self.speaking {
            return None;
        }
        Some(self.last_chunk_at? + self.silence_window?)
    }

    pub fn on_tick(&mut self, now: Instant) -> Option<SpeechSignal> {
        match self.deadline() {
            Some(deadline) if deadline <= now => self.stop(),
            _ => None,
        }
    }

    fn stop(&mut self) -> Option<SpeechSignal> {
        if !self.speaking {
            return None;
        }
        self.speaking = false;
        Some(SpeechSignal::Ended)
    }
}

/// Owns both audio devices for one session.
pub struct MediaPipeline {
    microphone: Box<dyn Microphone>,
    playback: Box<dyn PlaybackSink>,
    capture: Option<mpsc::Receiver<PcmFrame>>,
    mic_held: bool,
    playback_held: bool,
    tracker: SpeechOutputTracker,
}

impl MediaPipeline {
    #[must_use]
    pub fn new(
        microphone: Box<dyn Microphone>,
        playback: Box<dyn PlaybackSink>,
        silence_window: Option<Duration>,
    ) -> Self {
        Self {
            microphone,
            playback,
            capture: None,
            mic_held: false,
            playback_held: false,
            tracker: SpeechOutputTracker::new(silence_window),
        }
    }

    /// # Errors
    /// Returns [`Error::MicrophoneUnavailable`] if the device cannot be opened.
    pub async fn attach_microphone(&mut self) -> Result<()> {
        let frames = self
            .microphone
            .open()
            .await
            .map_err(|e| device_error(e, Error::MicrophoneUnavailable))?;
        self.capture = Some(frames);
        self.mic_held = true;
        info!("microphone attached");
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::PlaybackUnavailable`] if the device cannot be opened.
    pub async fn attach_playback(&mut self) -> Result<()> {
        self.playback
            .open()
            .await
            .map_err(|e| device_error(e, Error::PlaybackUnavailable))?;
        self.playback_held = true;
        info!("playback attached");
        Ok(())
    }

    /// Next captured frame, or `None` once the capture stream has ended.
    ///
    /// Pends forever while nothing is being captured.
    pub async fn next_frame(&mut self) -> Option<PcmFrame> {
        match self.capture.as_mut() {
            Some(frames) => frames.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Decode one base64 audio chunk and play it.
    ///
    /// Returns the number of decoded bytes and any speaking-signal change.
    ///
    /// # Errors
    /// Returns [`Error::PlaybackUnavailable`] if the sink fails.
    pub async fn play_chunk(&mut self, b64: &str) -> Result<(usize, Option<SpeechSignal>)> {
        let signal = self.tracker.on_chunk(Instant::now());
        let bytes = match general_purpose::STANDARD.decode(b64.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("skipping undecodable audio chunk: {err}");
                return Ok((0, signal));
            }
        };
        let pcm = pcm16_from_le_bytes(&bytes);
        if !pcm.is_empty() {
            self.playback
                .play(&pcm)
                .await
                .map_err(|e| device_error(e, Error::PlaybackUnavailable))?;
        }
        Ok((bytes.len(), signal))
    }

    pub fn audio_done(&mut self) -> Option<SpeechSignal> {
        self.tracker.on_done()
    }

    #[must_use]
    pub fn silence_deadline(&self) -> Option<Instant> {
        self.tracker.deadline()
    }

    pub fn silence_tick(&mut self, now: Instant) -> Option<SpeechSignal> {
        self.tracker.on_tick(now)
    }

    /// Stop handing out captured frames. The device stays held until
    /// [`MediaPipeline::release`].
    pub fn stop_forwarding(&mut self) {
        if self.capture.take().is_some() {
            debug!("stopped forwarding microphone audio");
        }
    }

    /// Release the microphone, then playback. Safe to call more than once.
    ///
    /// Returns `SpeechSignal::Ended` if the assistant was mid-speech.
    pub async fn release(&mut self) -> Option<SpeechSignal> {
        self.stop_forwarding();
        if std::mem::take(&mut self.mic_held) {
            self.microphone.release().await;
            info!("microphone released");
        }
        if std::mem::take(&mut self.playback_held) {
            self.playback.release().await;
            info!("playback released");
        }
        self.tracker.stop()
    }
}

impl std::fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("capturing", &self.capture.is_some())
            .field("mic_held", &self.mic_held)
            .field("playback_held", &self.playback_held)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

/// PCM16 little-endian samples as a base64 `input_audio_buffer.append` payload.
#[must_use]
pub fn encode_pcm16(samples: &[i16]) -> Option<String> {
    if samples.is_empty() {
        return None;
    }
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    Some(general_purpose::STANDARD.encode(buf))
}

fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn device_error(err: Error, wrap: fn(String) -> Error) -> Error {
    match err {
        Error::MicrophoneUnavailable(_) | Error::PlaybackUnavailable(_) => err,
        other => wrap(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeniedMicrophone;

    #[async_trait]
    impl Microphone for DeniedMicrophone {
        async fn open(&mut self) -> Result<mpsc::Receiver<PcmFrame>> {
            Err(Error::TransportFailure("permission denied".to_string()))
        }

        async fn release(&mut self) {}
    }

    fn pipeline(
        silence: Option<Duration>,
    ) -> (MediaPipeline, mpsc::Sender<PcmFrame>, mpsc::Receiver<PcmFrame>) {
        let (mic_tx, mic_rx) = mpsc::channel(8);
        let (play_tx, play_rx) = mpsc::channel(8);
        let media = MediaPipeline::new(
            Box::new(ChannelMicrophone::new(mic_rx)),
            Box::new(ChannelPlayback::new(play_tx)),
            silence,
        );
        (media, mic_tx, play_rx)
    }

    #[test]
    fn tracker_signals_once_per_burst() {
        let mut tracker = SpeechOutputTracker::new(None);
        let now = Instant::now();
        assert_eq!(tracker.on_chunk(now), Some(SpeechSignal::Started));
        assert_eq!(tracker.on_chunk(now), None);
        assert_eq!(tracker.on_done(), Some(SpeechSignal::Ended));
        assert_eq!(tracker.on_done(), None);
        assert_eq!(tracker.on_chunk(now), Some(SpeechSignal::Started));
    }

    #[test]
    fn tracker_without_window_has_no_deadline() {
        let mut tracker = SpeechOutputTracker::new(None);
        let now = Instant::now();
        tracker.on_chunk(now);
        assert_eq!(tracker.deadline(), None);
        assert_eq!(tracker.on_tick(now + Duration::from_secs(60)), None);
        assert!(tracker.is_speaking());
    }

    #[test]
    fn tracker_silence_window_ends_speech() {
        let window = Duration::from_millis(500);
        let mut tracker = SpeechOutputTracker::new(Some(window));
        let start = Instant::now();
        tracker.on_chunk(start);
        assert_eq!(tracker.deadline(), Some(start + window));
        assert_eq!(tracker.on_tick(start + Duration::from_millis(100)), None);
        assert_eq!(tracker.on_tick(start + window), Some(SpeechSignal::Ended));
        assert_eq!(tracker.deadline(), None);
    }

    #[test]
    fn encodes_little_endian() {
        assert_eq!(encode_pcm16(&[]), None);
        let b64 = encode_pcm16(&[1, -1]).unwrap();
        let bytes = general_purpose::STANDARD.decode(b64).unwrap();
        assert_eq!(bytes, vec![0x01, 0x00, 0xff, 0xff]);
    }

    #[tokio::test]
    async fn plays_chunks_in_order_and_skips_garbage() {
        let (mut media, _mic, mut played) = pipeline(None);
        media.attach_playback().await.unwrap();

        let first = encode_pcm16(&[1, 2]).unwrap();
        let second = encode_pcm16(&[3]).unwrap();
        let (_, signal) = media.play_chunk(&first).await.unwrap();
        assert_eq!(signal, Some(SpeechSignal::Started));
        let (bytes, signal) = media.play_chunk("%%not base64%%").await.unwrap();
        assert_eq!((bytes, signal), (0, None));
        media.play_chunk(&second).await.unwrap();

        assert_eq!(played.recv().await.unwrap(), vec![1, 2]);
        assert_eq!(played.recv().await.unwrap(), vec![3]);
        assert_eq!(media.audio_done(), Some(SpeechSignal::Ended));
    }

    #[tokio::test]
    async fn microphone_errors_are_device_errors() {
        let (play_tx, _play_rx) = mpsc::channel(1);
        let mut media = MediaPipeline::new(
            Box::new(DeniedMicrophone),
            Box::new(ChannelPlayback::new(play_tx)),
            None,
        );
        let err = media.attach_microphone().await.unwrap_err();
        assert!(
            matches!(err, Error::MicrophoneUnavailable(msg) if msg.contains("permission denied"))
        );
    }

    #[tokio::test]
    async fn playback_fails_when_receiver_is_gone() {
        let (mut media, _mic, played) = pipeline(None);
        drop(played);
        assert!(matches!(
            media.attach_playback().await,
            Err(Error::PlaybackUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn forwards_frames_until_stopped() {
        let (mut media, mic, _played) = pipeline(None);
        media.attach_microphone().await.unwrap();
        mic.send(vec![7, 8]).await.unwrap();
        assert_eq!(media.next_frame().await, Some(vec![7, 8]));

        media.stop_forwarding();
        let _ = mic.send(vec![9]).await;
        let next = tokio::time::timeout(Duration::from_millis(50), media.next_frame()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn release_is_idempotent_and_ends_speech() {
        let (mut media, _mic, _played) = pipeline(None);
        media.attach_microphone().await.unwrap();
        media.attach_playback().await.unwrap();
        media.play_chunk(&encode_pcm16(&[5]).unwrap()).await.unwrap();

        assert_eq!(media.release().await, Some(SpeechSignal::Ended));
        assert_eq!(media.release().await, None);
        assert!(!media.mic_held && !media.playback_held);
    }
}
