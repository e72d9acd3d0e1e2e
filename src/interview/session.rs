//! Session lifecycle: start, the event loop, and ordered teardown.

use super::builder::InterviewSessionBuilder;
use super::dispatch::Dispatcher;
use super::handlers::{Emitter, SessionEvent, SessionFailure};
use super::media::{MediaPipeline, encode_pcm16};
use super::negotiator::{Negotiated, Negotiator};
use super::transcript::{Transcript, TranscriptAssembler};
use super::transport::Transport;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::server_events::ServerEvent;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Errored,
    Ended,
}

impl SessionState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Active | Self::Ended)
                | (Self::Active, Self::Ended | Self::Errored)
                | (Self::Errored, Self::Ended)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }
}

struct Shared {
    state: watch::Sender<SessionState>,
    emitter: Emitter,
    stop: CancellationToken,
}

impl Shared {
    /// Move to `to` if the edge is allowed. On refusal returns the current state.
    fn transition(&self, to: SessionState) -> std::result::Result<SessionState, SessionState> {
        let mut outcome = Err(to);
        self.state.send_if_modified(|current| {
            if current.can_transition_to(to) {
                outcome = Ok(*current);
                *current = to;
                true
            } else {
                outcome = Err(*current);
                false
            }
        });
        if let Ok(from) = outcome {
            info!(?from, ?to, "session state changed");
            self.emitter.emit(SessionEvent::StateChanged { from, to });
        }
        outcome
    }

    fn fail(&self, err: &Error) {
        self.emitter.emit(SessionEvent::Failed(SessionFailure::from(err)));
    }
}

/// Everything `start` consumes.
struct Parts {
    negotiator: Negotiator,
    media: MediaPipeline,
    assembler: TranscriptAssembler,
}

/// One voice interview over one realtime connection.
///
/// Build with [`InterviewSession::builder`], then [`start`](Self::start) and
/// [`end`](Self::end). Dropping a session that is still running cancels it;
/// the event loop then tears down on its own.
pub struct InterviewSession {
    shared: Arc<Shared>,
    parts: Mutex<Option<Parts>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    transcript: watch::Receiver<Transcript>,
    system_prompt: Arc<str>,
}

impl InterviewSession {
    #[must_use]
    pub fn builder() -> InterviewSessionBuilder {
        InterviewSessionBuilder::new()
    }

    pub(crate) fn from_parts(
        negotiator: Negotiator,
        media: MediaPipeline,
        emitter: Emitter,
    ) -> Self {
        let (assembler, transcript) = TranscriptAssembler::new();
        let (state, _) = watch::channel(SessionState::Idle);
        let system_prompt = Arc::from(negotiator.config().instructions.as_str());
        Self {
            shared: Arc::new(Shared {
                state,
                emitter,
                stop: CancellationToken::new(),
            }),
            parts: Mutex::new(Some(Parts {
                negotiator,
                media,
                assembler,
            })),
            task: tokio::sync::Mutex::new(None),
            transcript,
            system_prompt,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Follow state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// A snapshot of the conversation so far.
    #[must_use]
    pub fn transcript(&self) -> Transcript {
        self.transcript.borrow().clone()
    }

    /// Follow the transcript as it grows.
    #[must_use]
    pub fn watch_transcript(&self) -> watch::Receiver<Transcript> {
        self.transcript.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.emitter.subscribe()
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Negotiate the connection, attach audio devices and start the event loop.
    ///
    /// On failure everything acquired so far is released and the session
    /// ends; the error is returned and also reported as
    /// [`SessionEvent::Failed`].
    ///
    /// # Errors
    /// - [`Error::AlreadyConnecting`] while another start is in flight.
    /// - [`Error::InvalidTransition`] unless the session is idle.
    /// - [`Error::Cancelled`] if [`end`](Self::end) was called meanwhile.
    /// - Any negotiation or device error.
    pub async fn start(&self) -> Result<()> {
        match self.shared.transition(SessionState::Connecting) {
            Ok(_) => {}
            Err(SessionState::Connecting) => return Err(Error::AlreadyConnecting),
            Err(from) => {
                return Err(Error::InvalidTransition {
                    from,
                    action: "start",
                });
            }
        }

        let mut guard = ConnectingGuard {
            shared: &self.shared,
            armed: true,
        };
        let parts = self.parts.lock().ok().and_then(|mut slot| slot.take());
        let Some(Parts {
            negotiator,
            mut media,
            assembler,
        }) = parts
        else {
            return Err(guard.abort(Error::InvalidTransition {
                from: SessionState::Connecting,
                action: "start",
            }));
        };

        let stop = self.shared.stop.clone();
        let negotiated = tokio::select! {
            biased;
            () = stop.cancelled() => Err(Error::Cancelled),
            result = negotiator.negotiate() => result,
        };
        let negotiated = match negotiated {
            Ok(n) => n,
            Err(err) => return Err(guard.abort(err)),
        };

        let attached = tokio::select! {
            biased;
            () = stop.cancelled() => Err(Error::Cancelled),
            result = attach_devices(&mut media) => result,
        };
        if let Err(err) = attached.and_then(|()| {
            if stop.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        }) {
            let mut dispatcher = Dispatcher::new(assembler, self.shared.emitter.clone());
            teardown(negotiated.transport, &mut media, &mut dispatcher).await;
            return Err(guard.abort(err));
        }

        guard.armed = false;
        if let Err(from) = self.shared.transition(SessionState::Active) {
            warn!(?from, "session left Connecting during start");
        }

        let dispatcher = Dispatcher::new(assembler, self.shared.emitter.clone());
        let handle = tokio::spawn(run(self.shared.clone(), negotiated, media, dispatcher));
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the session and wait until it has fully ended.
    ///
    /// Idempotent. On an idle session this does nothing.
    pub async fn end(&self) {
        if self.state() == SessionState::Idle {
            return;
        }
        self.shared.stop.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("session task failed: {err}");
            }
        }

        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}

impl Drop for InterviewSession {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

impl std::fmt::Debug for InterviewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterviewSession")
            .field("state", &self.state())
            .field("utterances", &self.transcript.borrow().len())
            .finish_non_exhaustive()
    }
}

/// Ends a start that did not reach `Active`, including when the `start`
/// future itself is dropped.
struct ConnectingGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn abort(&mut self, err: Error) -> Error {
        self.armed = false;
        warn!("session start failed: {err}");
        let _ = self.shared.transition(SessionState::Ended);
        self.shared.fail(&err);
        err
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.shared.transition(SessionState::Ended);
        }
    }
}

async fn attach_devices(media: &mut MediaPipeline) -> Result<()> {
    media.attach_microphone().await?;
    media.attach_playback().await
}

async fn run(
    shared: Arc<Shared>,
    negotiated: Negotiated,
    mut media: MediaPipeline,
    mut dispatcher: Dispatcher,
) {
    let Negotiated {
        mut transport,
        pending,
        ..
    } = negotiated;

    let failure = drive(&shared, transport.as_mut(), &mut media, &mut dispatcher, pending).await;
    if let Some(err) = &failure {
        warn!("session failed: {err}");
        let _ = shared.transition(SessionState::Errored);
        shared.fail(err);
    }

    teardown(transport, &mut media, &mut dispatcher).await;
    let _ = shared.transition(SessionState::Ended);
}

/// Runs until the caller asks to stop (`None`) or something fatal happens.
async fn drive(
    shared: &Shared,
    transport: &mut dyn Transport,
    media: &mut MediaPipeline,
    dispatcher: &mut Dispatcher,
    pending: VecDeque<ServerEvent>,
) -> Option<Error> {
    let stop = &shared.stop;
    for event in pending {
        match unless_stopped(stop, dispatcher.dispatch(event, media)).await {
            Some(Ok(())) => {}
            Some(Err(err)) => return Some(err),
            None => return None,
        }
    }

    loop {
        let deadline = media.silence_deadline();
        tokio::select! {
            biased;
            () = stop.cancelled() => {
                info!("end requested");
                return None;
            }
            event = transport.next_event() => match event {
                Ok(Some(event)) => {
                    let delivered = unless_stopped(stop, dispatcher.dispatch(event, media));
                    match delivered.await {
                        Some(Ok(())) => {}
                        Some(Err(err)) => return Some(err),
                        None => {
                            info!("end requested while delivering playback");
                            return None;
                        }
                    }
                }
                Ok(None) => {
                    return Some(Error::ConnectionLost("server closed the connection".to_string()));
                }
                Err(Error::MalformedEvent(msg)) => warn!("skipping malformed event: {msg}"),
                Err(err) => return Some(Error::ConnectionLost(err.to_string())),
            },
            frame = media.next_frame() => match frame {
                Some(frame) => {
                    let Some(audio) = encode_pcm16(&frame) else { continue };
                    let append = ClientEvent::audio_append(audio);
                    match unless_stopped(stop, transport.send(append)).await {
                        Some(Ok(())) => {}
                        Some(Err(err @ Error::InvalidClientEvent(_))) => return Some(err),
                        Some(Err(other)) => return Some(Error::ConnectionLost(other.to_string())),
                        None => {
                            info!("end requested while sending audio");
                            return None;
                        }
                    }
                }
                None => {
                    return Some(Error::MicrophoneUnavailable("capture stream ended".to_string()));
                }
            },
            () = sleep_until(deadline) => {
                let signal = media.silence_tick(Instant::now());
                dispatcher.speech(signal);
            }
        }
    }
}

/// Stop forwarding audio, close the stream, drop the transport, then release
/// the microphone and playback.
async fn teardown(
    mut transport: Box<dyn Transport>,
    media: &mut MediaPipeline,
    dispatcher: &mut Dispatcher,
) {
    media.stop_forwarding();
    match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
        Ok(Ok(())) => info!("event stream closed"),
        Ok(Err(err)) => debug!("closing event stream: {err}"),
        Err(_) => debug!("event stream close timed out"),
    }
    drop(transport);
    let signal = media.release().await;
    dispatcher.speech(signal);
    dispatcher.close_transcript();
}

/// Awaits `fut` unless the stop token fires first.
async fn unless_stopped<F: Future>(stop: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = stop.cancelled() => None,
        out = fut => Some(out),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
