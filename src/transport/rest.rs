use reqwest::{Client, header::{HeaderValue, AUTHORIZATION}};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A short-lived secret usable as the bearer of one realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSecret {
    pub value: String,
    /// Unix timestamp (seconds) after which the secret is rejected.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl ClientSecret {
    #[must_use]
    pub fn is_expired_at(&self, unix_now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= unix_now)
    }
}

/// Accepts both the OpenAI session shape and a bare secret from a relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SecretResponse {
    Wrapped { client_secret: ClientSecret },
    Bare(ClientSecret),
}

impl From<SecretResponse> for ClientSecret {
    fn from(res: SecretResponse) -> Self {
        match res {
            SecretResponse::Wrapped { client_secret } | SecretResponse::Bare(client_secret) => {
                client_secret
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSecretRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

pub const BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// An adapter for the REST endpoints that mint realtime credentials.
#[derive(Clone, Debug)]
pub struct RealtimeRestAdapter {
    client: Client,
    auth_header: Option<HeaderValue>,
    base_url: String,
}

impl RealtimeRestAdapter {
    /// Create a new adapter authenticating with the given API key.
    ///
    /// # Errors
    /// Returns an error if the API key results in an invalid header or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new(api_key: &str) -> Result<Self> {
        Self::new_with_timeouts(Some(api_key), DEFAULT_TIMEOUT, DEFAULT_POOL_IDLE_TIMEOUT)
    }

    /// Create an adapter that sends no `Authorization` header.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn anonymous() -> Result<Self> {
        Self::new_with_timeouts(None, DEFAULT_TIMEOUT, DEFAULT_POOL_IDLE_TIMEOUT)
    }

    /// Create a new adapter with custom timeouts.
    ///
    /// # Errors
    /// Returns an error if the API key results in an invalid header or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new_with_timeouts(
        api_key: Option<&str>,
        timeout: Duration,
        pool_idle_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(pool_idle_timeout)
            .build()?;

        let auth_header = api_key
            .map(|key| HeaderValue::from_str(&format!("Bearer {key}")))
            .transpose()?;

        Ok(Self {
            client,
            auth_header,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point the adapter at a different API root (proxies, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Mint an ephemeral client secret for one realtime session.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or the response has no secret.
    pub async fn create_session_secret(
        &self,
        request: &SessionSecretRequest,
    ) -> Result<ClientSecret> {
        let url = format!("{}/realtime/sessions", self.base_url);
        self.post_for_secret(&url, request).await
    }

    /// Ask an arbitrary token endpoint (usually an application backend) for a secret.
    ///
    /// # Errors
    /// Returns an error if the HTTP request fails or the response has no secret.
    pub async fn request_token<B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<ClientSecret> {
        self.post_for_secret(url, body).await
    }

    async fn post_for_secret<B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<ClientSecret> {
        let mut req = self.client.post(url).json(body);
        if let Some(auth) = &self.auth_header {
            req = req.header(AUTHORIZATION, auth);
        }

        let res = req.send().await?.error_for_status()?;
        let secret: SecretResponse = res.json().await?;
        Ok(secret.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_and_bare_secrets() {
        let wrapped: SecretResponse = serde_json::from_str(
            r#"{"id":"sess_1","client_secret":{"value":"ek_1","expires_at":100}}"#,
        )
        .unwrap();
        assert_eq!(ClientSecret::from(wrapped).value, "ek_1");

        let bare: SecretResponse = serde_json::from_str(r#"{"value":"ek_2"}"#).unwrap();
        let bare = ClientSecret::from(bare);
        assert_eq!(bare.value, "ek_2");
        assert_eq!(bare.expires_at, None);
    }

    #[test]
    fn expiry_is_inclusive() {
        let secret = ClientSecret { value: "ek".to_string(), expires_at: Some(10) };
        assert!(!secret.is_expired_at(9));
        assert!(secret.is_expired_at(10));
        let open = ClientSecret { value: "ek".to_string(), expires_at: None };
        assert!(!open.is_expired_at(u64::MAX));
    }
}
