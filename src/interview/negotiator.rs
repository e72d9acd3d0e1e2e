//! Credential, connection and session-configuration handshake.

use super::credentials::CredentialProvider;
use super::transport::{Connector, Transport};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{Session, SessionConfig};
use crate::protocol::server_events::ServerEvent;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

/// An open, configured transport ready for audio.
pub struct Negotiated {
    pub transport: Box<dyn Transport>,
    /// The server's echo of the applied configuration.
    pub session: Session,
    /// Events that arrived during the handshake, in arrival order.
    pub pending: VecDeque<ServerEvent>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("session", &self.session)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Created,
    Updated,
}

impl Awaiting {
    const fn event_name(self) -> &'static str {
        match self {
            Self::Created => "session.created",
            Self::Updated => "session.updated",
        }
    }
}

pub struct Negotiator {
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
    model: String,
    config: SessionConfig,
    greet_first: bool,
    timeout: Duration,
}

impl Negotiator {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn Connector>,
        model: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            credentials,
            connector,
            model: model.into(),
            config,
            greet_first: true,
            timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn greet_first(mut self, greet_first: bool) -> Self {
        self.greet_first = greet_first;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Fetch a credential, connect, and apply the session configuration.
    ///
    /// # Errors
    /// - [`Error::AuthFailure`] if no usable credential can be obtained.
    /// - [`Error::TransportFailure`] for network faults or an early close.
    /// - [`Error::NegotiationFailure`] if the server rejects the session or
    ///   the handshake exceeds the timeout.
    pub async fn negotiate(&self) -> Result<Negotiated> {
        match tokio::time::timeout(self.timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(Error::NegotiationFailure(format!(
                "handshake did not finish within {:?}",
                self.timeout
            ))),
        }
    }

    async fn handshake(&self) -> Result<Negotiated> {
        let credential = self.credentials.fetch().await.map_err(|e| match e {
            Error::AuthFailure(_) => e,
            other => Error::AuthFailure(other.to_string()),
        })?;
        if credential.is_expired_at(unix_now()) {
            return Err(Error::AuthFailure("credential has already expired".to_string()));
        }

        info!(model = %self.model, "connecting to realtime endpoint");
        let mut transport = self.connector.connect(&credential, &self.model).await?;
        drop(credential);

        let mut pending = VecDeque::new();
        match self.configure(transport.as_mut(), &mut pending).await {
            Ok(session) => {
                info!(session_id = ?session.id, "session configured");
                Ok(Negotiated {
                    transport,
                    session,
                    pending,
                })
            }
            Err(err) => {
                if let Err(close_err) = transport.close().await {
                    debug!("close after failed handshake: {close_err}");
                }
                Err(err)
            }
        }
    }

    async fn configure(
        &self,
        transport: &mut dyn Transport,
        pending: &mut VecDeque<ServerEvent>,
    ) -> Result<Session> {
        await_session(transport, pending, Awaiting::Created).await?;

        transport
            .send(ClientEvent::session_update(self.config.clone()))
            .await
            .map_err(send_error)?;
        let session = await_session(transport, pending, Awaiting::Updated).await?;

        if self.greet_first {
            transport
                .send(ClientEvent::response_create())
                .await
                .map_err(send_error)?;
        }
        Ok(session)
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("model", &self.model)
            .field("greet_first", &self.greet_first)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn await_session(
    transport: &mut dyn Transport,
    pending: &mut VecDeque<ServerEvent>,
    awaiting: Awaiting,
) -> Result<Session> {
    loop {
        match transport.next_event().await {
            Ok(Some(ServerEvent::SessionCreated { session, .. }))
                if awaiting == Awaiting::Created =>
            {
                return Ok(session);
            }
            Ok(Some(ServerEvent::SessionUpdated { session, .. }))
                if awaiting == Awaiting::Updated =>
            {
                return Ok(session);
            }
            Ok(Some(ServerEvent::Error { error, .. })) => {
                return Err(Error::NegotiationFailure(error.message));
            }
            Ok(Some(other)) => {
                debug!("holding {} until the session is configured", other.kind());
                pending.push_back(other);
            }
            Ok(None) => {
                return Err(Error::TransportFailure(format!(
                    "connection closed while waiting for {}",
                    awaiting.event_name()
                )));
            }
            Err(Error::MalformedEvent(msg)) => warn!("malformed event during handshake: {msg}"),
            Err(err) => return Err(Error::TransportFailure(err.to_string())),
        }
    }
}

fn send_error(err: Error) -> Error {
    match err {
        Error::InvalidClientEvent(_) => err,
        other => Error::TransportFailure(other.to_string()),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::transport::BoxFuture;
    use crate::transport::rest::ClientSecret;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct StaticSecret(Option<u64>);

    #[async_trait]
    impl CredentialProvider for StaticSecret {
        async fn fetch(&self) -> Result<ClientSecret> {
            Ok(ClientSecret {
                value: "ek_test".to_string(),
                expires_at: self.0,
            })
        }
    }

    struct FailingSecret;

    #[async_trait]
    impl CredentialProvider for FailingSecret {
        async fn fetch(&self) -> Result<ClientSecret> {
            Err(Error::TransportFailure("relay unreachable".to_string()))
        }
    }

    struct ScriptTransport {
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl Transport for ScriptTransport {
        fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<()>> {
            self.sent.lock().unwrap().push(event);
            Box::pin(async { Ok(()) })
        }

        fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>> {
            Box::pin(async move { Ok(self.inbound.recv().await) })
        }

        fn close(&mut self) -> BoxFuture<'_, Result<()>> {
            *self.closed.lock().unwrap() = true;
            Box::pin(async { Ok(()) })
        }
    }

    struct ScriptConnector {
        transport: Mutex<Option<ScriptTransport>>,
    }

    #[async_trait]
    impl Connector for ScriptConnector {
        async fn connect(
            &self,
            credential: &ClientSecret,
            _model: &str,
        ) -> Result<Box<dyn Transport>> {
            assert_eq!(credential.value, "ek_test");
            let transport = self.transport.lock().unwrap().take().unwrap();
            Ok(Box::new(transport))
        }
    }

    struct Harness {
        events: mpsc::UnboundedSender<ServerEvent>,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
        closed: Arc<Mutex<bool>>,
        connector: Arc<ScriptConnector>,
    }

    fn harness() -> Harness {
        let (events, inbound) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));
        let connector = Arc::new(ScriptConnector {
            transport: Mutex::new(Some(ScriptTransport {
                inbound,
                sent: sent.clone(),
                closed: closed.clone(),
            })),
        });
        Harness {
            events,
            sent,
            closed,
            connector,
        }
    }

    fn event(value: serde_json::Value) -> ServerEvent {
        serde_json::from_value(value).unwrap()
    }

    fn negotiator(h: &Harness, credentials: Arc<dyn CredentialProvider>) -> Negotiator {
        Negotiator::new(
            credentials,
            h.connector.clone(),
            "gpt-4o-realtime-preview",
            SessionConfig::new("Interview me."),
        )
    }

    #[tokio::test]
    async fn configures_once_and_greets() {
        let h = harness();
        h.events
            .send(event(json!({"type": "session.created", "session": {"id": "sess_1"}})))
            .unwrap();
        h.events.send(event(json!({"type": "rate_limits.updated", "rate_limits": []}))).unwrap();
        h.events
            .send(event(json!({"type": "session.updated", "session": {"id": "sess_1"}})))
            .unwrap();

        let negotiated = negotiator(&h, Arc::new(StaticSecret(None)))
            .negotiate()
            .await
            .unwrap();

        assert_eq!(negotiated.session.id.as_deref(), Some("sess_1"));
        assert_eq!(negotiated.pending.len(), 1);
        let sent = h.sent.lock().unwrap();
        let kinds: Vec<_> = sent.iter().map(ClientEvent::kind).collect();
        assert_eq!(kinds, vec!["session.update", "response.create"]);
        match &sent[0] {
            ClientEvent::SessionUpdate { session, .. } => {
                assert_eq!(session.instructions, "Interview me.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn greeting_can_be_disabled() {
        let h = harness();
        h.events.send(event(json!({"type": "session.created", "session": {}}))).unwrap();
        h.events.send(event(json!({"type": "session.updated", "session": {}}))).unwrap();

        negotiator(&h, Arc::new(StaticSecret(None)))
            .greet_first(false)
            .negotiate()
            .await
            .unwrap();
        assert_eq!(h.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_fails_negotiation_and_closes() {
        let h = harness();
        h.events.send(event(json!({"type": "session.created", "session": {}}))).unwrap();
        h.events
            .send(event(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "bad voice"}
            })))
            .unwrap();

        let err = negotiator(&h, Arc::new(StaticSecret(None))).negotiate().await.unwrap_err();
        assert!(matches!(err, Error::NegotiationFailure(msg) if msg == "bad voice"));
        assert!(*h.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn early_close_is_a_transport_failure() {
        let h = harness();
        let Harness { events, connector, .. } = h;
        drop(events);
        let n = Negotiator::new(
            Arc::new(StaticSecret(None)),
            connector,
            "m",
            SessionConfig::new("x"),
        );
        assert!(matches!(n.negotiate().await, Err(Error::TransportFailure(_))));
    }

    #[tokio::test]
    async fn credential_problems_are_auth_failures() {
        let h = harness();
        let err = negotiator(&h, Arc::new(FailingSecret)).negotiate().await.unwrap_err();
        assert!(matches!(err, Error::AuthFailure(msg) if msg.contains("relay unreachable")));

        let expired = negotiator(&h, Arc::new(StaticSecret(Some(1)))).negotiate().await;
        assert!(matches!(expired, Err(Error::AuthFailure(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let h = harness();
        let err = negotiator(&h, Arc::new(StaticSecret(None)))
            .timeout(Duration::from_secs(2))
            .negotiate()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationFailure(_)));
        drop(h.events);
    }
}
