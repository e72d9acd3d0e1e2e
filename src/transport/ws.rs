use crate::error::{Error, Result};
use reqwest::header::HeaderValue;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

#[derive(Debug)]
pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    pub(crate) const fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self(stream)
    }
}

impl futures::Stream for WsStream {
    type Item = std::result::Result<tungstenite::Message, tungstenite::Error>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.0).poll_next(cx)
    }
}

impl futures::Sink<tungstenite::Message> for WsStream {
    type Error = tungstenite::Error;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::pin::Pin::new(&mut self.0).poll_ready(cx)
    }

    fn start_send(
        mut self: std::pin::Pin<&mut Self>,
        item: tungstenite::Message,
    ) -> std::result::Result<(), Self::Error> {
        std::pin::Pin::new(&mut self.0).start_send(item)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::pin::Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::pin::Pin::new(&mut self.0).poll_close(cx)
    }
}

pub const WS_BASE_URL: &str = "wss://api.openai.com/v1/realtime";

/// Establish a WebSocket connection to the Realtime API using a short-lived
/// bearer credential.
///
/// # Errors
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(base_url: &str, bearer: &str, model: &str) -> Result<WsStream> {
    let mut url = Url::parse(base_url)?;
    url.query_pairs_mut().append_pair("model", model);

    let auth_header = HeaderValue::from_str(&format!("Bearer {bearer}"))?;

    let mut req = tungstenite::client::IntoClientRequest::into_client_request(url.as_str())?;
    let h = req.headers_mut();
    h.insert(reqwest::header::AUTHORIZATION, auth_header);
    h.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
    let (ws_stream, _) = connect_async(req).await?;

    tracing::info!(%model, "Connected to OpenAI Realtime");

    Ok(WsStream::new(ws_stream))
}

/// Sort a failed handshake into a rejection by the endpoint or a network fault.
#[must_use]
pub fn classify_handshake_error(err: Error) -> Error {
    match err {
        Error::WebSocket(tungstenite::Error::Http(resp)) if resp.status().is_client_error() => {
            let status = resp.status();
            Error::NegotiationFailure(format!("endpoint rejected the connection: {status}"))
        }
        Error::WebSocket(other) => Error::TransportFailure(other.to_string()),
        Error::Url(e) => Error::TransportFailure(format!("invalid endpoint URL: {e}")),
        Error::Header(e) => Error::AuthFailure(format!("credential is not a valid header: {e}")),
        other => other,
    }
}
