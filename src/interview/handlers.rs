use super::session::SessionState;
use crate::error::{Error, ErrorKind};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something a UI may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    AssistantTextDelta {
        delta: String,
    },
    UserTextFinal {
        text: String,
    },
    AudioOutputDelta {
        bytes: usize,
    },
    AudioOutputDone,
    SpeechOutputStarted,
    SpeechOutputEnded,
    /// A server `error` event after negotiation. The session keeps running.
    ServerError {
        code: Option<String>,
        message: String,
    },
    /// A fatal error. The session is ending or has ended.
    Failed(SessionFailure),
}

/// Cloneable summary of an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for SessionFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type EventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Callbacks registered through the builder.
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_event: Option<EventCallback>,
}

impl EventHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// Fans events out to the callback and to broadcast subscribers.
#[derive(Clone)]
pub(crate) struct Emitter {
    handlers: EventHandlers,
    tx: broadcast::Sender<SessionEvent>,
}

impl Emitter {
    pub(crate) fn new(handlers: EventHandlers) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { handlers, tx }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Some(cb) = &self.handlers.on_event {
            cb(event.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emits_to_callback_and_subscribers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let emitter =
            Emitter::new(EventHandlers::new().on_event(move |e| sink.lock().unwrap().push(e)));
        let mut rx = emitter.subscribe();

        emitter.emit(SessionEvent::SpeechOutputStarted);

        assert_eq!(*seen.lock().unwrap(), vec![SessionEvent::SpeechOutputStarted]);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::SpeechOutputStarted);
    }

    #[test]
    fn failure_keeps_kind_and_message() {
        let failure = SessionFailure::from(&Error::ConnectionLost("reset".to_string()));
        assert_eq!(failure.kind, ErrorKind::ConnectionLost);
        assert!(failure.message.contains("reset"));
    }
}
