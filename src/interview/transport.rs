use crate::protocol::client_events::ClientEvent;
use crate::protocol::server_events::ServerEvent;
use crate::transport::rest::ClientSecret;
use crate::transport::ws::{WS_BASE_URL, classify_handshake_error};
use crate::{RealtimeClient, Result};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One live, ordered, bidirectional event stream to the realtime endpoint.
///
/// A session owns its transport exclusively; it is never shared between tasks.
pub trait Transport: Send {
    fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<()>>;
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>>;
    /// Close the event stream. Dropping the transport afterwards releases it.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Opens a [`Transport`] with a freshly minted credential.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    /// `TransportFailure` for network faults, `NegotiationFailure` when the
    /// endpoint refuses the connection.
    async fn connect(&self, credential: &ClientSecret, model: &str) -> Result<Box<dyn Transport>>;
}

/// Connects over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: WS_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, credential: &ClientSecret, model: &str) -> Result<Box<dyn Transport>> {
        let client = RealtimeClient::connect(&self.base_url, &credential.value, model)
            .await
            .map_err(classify_handshake_error)?;
        Ok(Box::new(WsTransport { client }))
    }
}

struct WsTransport {
    client: RealtimeClient,
}

impl Transport for WsTransport {
    fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.client.send(event).await })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>> {
        Box::pin(async move { self.client.next_event().await })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.client.close().await })
    }
}
