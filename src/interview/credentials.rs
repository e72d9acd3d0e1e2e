use crate::protocol::models::{DEFAULT_MODEL, Voice};
use crate::transport::rest::{ClientSecret, RealtimeRestAdapter, SessionSecretRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Source of short-lived realtime credentials.
///
/// The negotiator calls [`CredentialProvider::fetch`] once per session and
/// discards the result after connecting. Implementations must mint a new
/// credential on every call rather than hand out a cached one.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    /// Any error is reported to the caller as `AuthFailure`.
    async fn fetch(&self) -> Result<ClientSecret>;
}

/// Mints ephemeral secrets directly from the OpenAI REST API.
#[derive(Debug, Clone)]
pub struct OpenAiClientSecrets {
    rest: RealtimeRestAdapter,
    request: SessionSecretRequest,
}

impl OpenAiClientSecrets {
    /// # Errors
    /// Returns an error if the API key is not a valid header value.
    #[allow(clippy::result_large_err)]
    pub fn new(api_key: &str) -> Result<Self> {
        Ok(Self {
            rest: RealtimeRestAdapter::new(api_key)?,
            request: SessionSecretRequest {
                model: DEFAULT_MODEL.to_string(),
                voice: None,
            },
        })
    }

    /// Read the API key from `OPENAI_API_KEY`.
    ///
    /// # Errors
    /// Returns `AuthFailure` if the variable is missing or empty.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::AuthFailure("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(&key)
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.request.model = model.into();
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<Voice>) -> Self {
        self.request.voice = Some(voice.into().to_string());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.rest = self.rest.with_base_url(base_url);
        self
    }
}

#[async_trait]
impl CredentialProvider for OpenAiClientSecrets {
    async fn fetch(&self) -> Result<ClientSecret> {
        self.rest.create_session_secret(&self.request).await
    }
}

/// Fetches secrets from an application backend that relays to the API.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    rest: RealtimeRestAdapter,
    url: String,
    body: Value,
}

impl TokenEndpoint {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rest: RealtimeRestAdapter::anonymous()?,
            url: url.into(),
            body: Value::Object(serde_json::Map::new()),
        })
    }

    /// Authenticate against the backend with a bearer key.
    ///
    /// # Errors
    /// Returns an error if the key is not a valid header value.
    #[allow(clippy::result_large_err)]
    pub fn bearer(mut self, key: &str) -> Result<Self> {
        self.rest = RealtimeRestAdapter::new(key)?;
        Ok(self)
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

#[async_trait]
impl CredentialProvider for TokenEndpoint {
    async fn fetch(&self) -> Result<ClientSecret> {
        self.rest.request_token(&self.url, &self.body).await
    }
}
