//! Bearer token acquisition for the Azure Key Vault backend.
//!
//! Tokens come from one of two places:
//! - a static token supplied through `AZURE_TOKEN`, used as-is and never
//!   exchanged or refreshed;
//! - an OAuth2 client-credentials exchange against
//!   `{authority}{tenant}/oauth2/token`, cached until it expires or the vault
//!   rejects it.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use super::error::{Result, SecretsError};
use super::retry::{send_with_retry, RetryConfig};
use super::types::SecretString;

/// OAuth2 grant used for the token exchange.
pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

/// Resource (audience) the token is requested for.
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

/// A cached token is treated as expired this long before its actual expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Service principal credentials for the client-credentials exchange.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    // The v1 endpoint returns this as a string, v2 as a number.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn expires_in(&self) -> Option<Duration> {
        let seconds = match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64()?,
            serde_json::Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        Some(Duration::from_secs(seconds))
    }
}

#[derive(Debug)]
struct CachedToken {
    token: SecretString,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() < expires_at,
            None => true,
        }
    }
}

/// Acquires and caches the bearer token used by [`AzureSecretClient`].
///
/// [`AzureSecretClient`]: super::azure::AzureSecretClient
#[derive(Debug)]
pub struct TokenProvider {
    http: reqwest::Client,
    authority_host: String,
    credentials: Option<ClientCredentials>,
    static_token: Option<SecretString>,
    retry: RetryConfig,
    // Held across the exchange so concurrent callers wait for a single request.
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(
        http: reqwest::Client,
        authority_host: impl Into<String>,
        credentials: Option<ClientCredentials>,
        static_token: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            authority_host: authority_host.into(),
            credentials,
            static_token,
            retry: RetryConfig::default(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Whether a rejected token can be replaced by a fresh exchange.
    pub fn can_refresh(&self) -> bool {
        self.static_token.is_none() && self.credentials.is_some()
    }

    /// Returns the current token, exchanging credentials if none is cached.
    pub async fn ensure_token(&self) -> Result<SecretString> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref().filter(|entry| entry.is_fresh()) {
            return Ok(entry.token.clone());
        }

        let entry = self.exchange().await?;
        let token = entry.token.clone();
        *cached = Some(entry);
        Ok(token)
    }

    /// Drops the cached token so the next call performs a new exchange.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn exchange(&self) -> Result<CachedToken> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            SecretsError::authentication(
                "AZURE_TOKEN or AZURE_TENANT_ID, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET needs to be set",
            )
        })?;

        let url = token_url(&self.authority_host, &credentials.tenant_id)?;
        let params = [
            ("grant_type", CLIENT_CREDENTIALS_GRANT),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("resource", KEY_VAULT_RESOURCE),
        ];

        debug!(tenant_id = %credentials.tenant_id, "Requesting Azure bearer token");
        let response = send_with_retry(&self.retry, url.path(), || {
            self.http.post(url.clone()).form(&params)
        })
        .await
        .map_err(|e| {
            SecretsError::authentication_with_source(format!("token request failed: {}", e), e)
        })?;

        let body = response.bytes().await.map_err(|e| {
            SecretsError::authentication_with_source(
                format!("failed to read token response: {}", e),
                e,
            )
        })?;
        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            SecretsError::authentication_with_source(
                format!("could not decode token response: {}", e),
                e,
            )
        })?;

        let expires_at = parsed
            .expires_in()
            .map(|ttl| Instant::now() + ttl.saturating_sub(EXPIRY_SKEW));
        info!(
            tenant_id = %credentials.tenant_id,
            expires_in_secs = ?parsed.expires_in().map(|d| d.as_secs()),
            "Acquired Azure bearer token"
        );

        Ok(CachedToken { token: SecretString::new(parsed.access_token), expires_at })
    }
}

fn token_url(authority_host: &str, tenant_id: &str) -> Result<Url> {
    let mut base = authority_host.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let parsed = Url::parse(&base)
        .map_err(|source| SecretsError::InvalidUrl { url: base.clone(), source })?;
    let joined = format!("{}/oauth2/token", tenant_id);
    parsed.join(&joined).map_err(|source| SecretsError::InvalidUrl { url: joined, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    fn credentials() -> ClientCredentials {
        ClientCredentials {
            tenant_id: "tenant-1".to_string(),
            client_id: "client-1".to_string(),
            client_secret: SecretString::new("shh"),
        }
    }

    fn provider(server: &MockServer) -> TokenProvider {
        TokenProvider::new(reqwest::Client::new(), server.uri(), Some(credentials()), None)
            .with_retry_config(fast_retry())
    }

    #[test]
    fn test_token_url_joins_tenant() {
        let url = token_url("https://login.microsoftonline.com/", "tenant-1").unwrap();
        assert_eq!(url.as_str(), "https://login.microsoftonline.com/tenant-1/oauth2/token");

        let url = token_url("http://127.0.0.1:8080", "t").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/t/oauth2/token");
    }

    #[test]
    fn test_expires_in_accepts_string_and_number() {
        let from_string: TokenResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": "3599"})).unwrap();
        assert_eq!(from_string.expires_in(), Some(Duration::from_secs(3599)));

        let from_number: TokenResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": 60})).unwrap();
        assert_eq!(from_number.expires_in(), Some(Duration::from_secs(60)));

        let missing: TokenResponse = serde_json::from_value(json!({"access_token": "a"})).unwrap();
        assert_eq!(missing.expires_in(), None);
    }

    #[tokio::test]
    async fn test_token_is_exchanged_once_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1"))
            .and(body_string_contains("resource=https%3A%2F%2Fvault.azure.net"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "bearer-1", "expires_in": "3599"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tokens = provider(&server);
        assert_eq!(tokens.ensure_token().await.unwrap().expose_secret(), "bearer-1");
        assert_eq!(tokens.ensure_token().await.unwrap().expose_secret(), "bearer-1");
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = provider(&server);
        tokens.ensure_token().await.unwrap();
        tokens.invalidate().await;
        tokens.ensure_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_static_token_skips_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tokens = TokenProvider::new(
            reqwest::Client::new(),
            server.uri(),
            None,
            Some(SecretString::new("static")),
        );
        assert_eq!(tokens.ensure_token().await.unwrap().expose_secret(), "static");
        assert!(!tokens.can_refresh());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_without_network() {
        let tokens = TokenProvider::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            None,
            None,
        );
        let err = tokens.ensure_token().await.unwrap_err();
        assert!(matches!(err, SecretsError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_non_success_status_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).ensure_token().await.unwrap_err();
        assert!(matches!(err, SecretsError::Authentication { .. }));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = provider(&server).ensure_token().await.unwrap_err();
        assert!(matches!(err, SecretsError::Authentication { .. }));
        assert!(err.to_string().contains("decode"));
    }
}
