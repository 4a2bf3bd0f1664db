//! Azure Key Vault client.
//!
//! A secret is read in two calls: list the versions of the resolved secret
//! name, pick the most recently created one, then fetch that version's value.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::error::{Result, SecretsError};
use super::resolver::KeyResolver;
use super::retry::{send_with_retry, RetryConfig};
use super::token::{ClientCredentials, TokenProvider};
use super::types::SecretString;

pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const AZURE_KEY_VAULT_URL: &str = "AZURE_KEY_VAULT_URL";
pub const AZURE_API_VERSION: &str = "AZURE_API_VERSION";
pub const AZURE_TOKEN: &str = "AZURE_TOKEN";
pub const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";

pub const DEFAULT_API_VERSION: &str = "7.0";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// Per-request timeout for Key Vault and token calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const BACKEND: &str = "Azure Key Vault";

/// Azure connection settings, read once from the environment.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub key_vault_url: Option<String>,
    pub api_version: String,
    pub static_token: Option<SecretString>,
    pub authority_host: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            key_vault_url: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            static_token: None,
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
        }
    }
}

impl AzureConfig {
    /// Load configuration from environment variables
    ///
    /// Uses:
    /// - `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`
    /// - `AZURE_KEY_VAULT_URL`
    /// - `AZURE_API_VERSION` (default: "7.0")
    /// - `AZURE_TOKEN` (optional, skips the OAuth2 exchange)
    /// - `AZURE_AUTHORITY_HOST` (default: "https://login.microsoftonline.com/")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Self {
            tenant_id: get(AZURE_TENANT_ID),
            client_id: get(AZURE_CLIENT_ID),
            client_secret: get(AZURE_CLIENT_SECRET).map(SecretString::new),
            key_vault_url: get(AZURE_KEY_VAULT_URL),
            api_version: get(AZURE_API_VERSION)
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            static_token: get(AZURE_TOKEN).map(SecretString::new),
            authority_host: get(AZURE_AUTHORITY_HOST)
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
        }
    }

    /// Names of the variables whose absence leaves the backend unusable.
    ///
    /// Client credentials are only reported when no static token is set.
    pub fn missing_values(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.key_vault_url.is_none() {
            missing.push(AZURE_KEY_VAULT_URL);
        }
        if self.static_token.is_none() {
            if self.tenant_id.is_none() {
                missing.push(AZURE_TENANT_ID);
            }
            if self.client_id.is_none() {
                missing.push(AZURE_CLIENT_ID);
            }
            if self.client_secret.is_none() {
                missing.push(AZURE_CLIENT_SECRET);
            }
        }
        missing
    }

    fn credentials(&self) -> Option<ClientCredentials> {
        Some(ClientCredentials {
            tenant_id: self.tenant_id.clone()?,
            client_id: self.client_id.clone()?,
            client_secret: self.client_secret.clone()?,
        })
    }
}

/// One entry of the `versions` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretVersion {
    pub id: String,
    #[serde(default)]
    pub attributes: VersionAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionAttributes {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub recovery_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretVersions {
    #[serde(default)]
    value: Vec<SecretVersion>,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
}

/// Picks the version with the greatest `created` timestamp.
///
/// Ties keep the earliest entry in listing order. The version identifier is
/// the last `/`-separated segment of the entry's `id`.
pub fn select_latest_version(versions: &[SecretVersion]) -> Option<String> {
    let mut latest: Option<&SecretVersion> = None;
    for version in versions {
        match latest {
            Some(current) if version.attributes.created <= current.attributes.created => {}
            _ => latest = Some(version),
        }
    }
    latest.and_then(|v| v.id.rsplit('/').next()).map(str::to_string)
}

/// Client for Azure Key Vault secrets.
#[derive(Debug)]
pub struct AzureSecretClient {
    http: reqwest::Client,
    vault_url: std::result::Result<Url, String>,
    api_version: String,
    resolver: KeyResolver,
    tokens: TokenProvider,
    retry: RetryConfig,
}

impl AzureSecretClient {
    /// Creates a client. Construction never fails; missing or invalid
    /// configuration surfaces on the first [`get_secret`](Self::get_secret).
    pub fn new(config: AzureConfig, resolver: KeyResolver) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let vault_url = match config.key_vault_url.as_deref() {
            None => Err(format!("{} not set", AZURE_KEY_VAULT_URL)),
            Some(raw) => Url::parse(raw)
                .map_err(|e| format!("invalid {} '{}': {}", AZURE_KEY_VAULT_URL, raw, e)),
        };

        if let Ok(url) = &vault_url {
            info!(
                vault_url = %url,
                api_version = %config.api_version,
                "Initialized Azure Key Vault client"
            );
        }

        let tokens = TokenProvider::new(
            http.clone(),
            config.authority_host.clone(),
            config.credentials(),
            config.static_token.clone(),
        );

        Self {
            http,
            vault_url,
            api_version: config.api_version,
            resolver,
            tokens,
            retry: RetryConfig::default(),
        }
    }

    /// Overrides the retry policy for both vault and token requests.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.tokens = self.tokens.with_retry_config(retry.clone());
        self.retry = retry;
        self
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut KeyResolver {
        &mut self.resolver
    }

    /// Fetches the latest version of the secret at `path`.
    pub async fn get_secret(&self, path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(SecretsError::not_found(path));
        }

        let resolved = self.resolver.resolve(path);
        debug!(path = %path, resolved = %resolved, "Fetching Azure secret");

        let versions: SecretVersions =
            self.get_json(&format!("/secrets/{}/versions", resolved)).await?;
        let version = select_latest_version(&versions.value)
            .ok_or_else(|| SecretsError::not_found(resolved.clone()))?;
        debug!(resolved = %resolved, version = %version, "Selected latest secret version");

        let bundle: SecretBundle =
            self.get_json(&format!("/secrets/{}/{}", resolved, version)).await?;
        Ok(bundle.value)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        // Token first: missing credentials are reported before a missing URL.
        let token = self.tokens.ensure_token().await?;

        let mut url = self
            .vault_url
            .as_ref()
            .map_err(|reason| SecretsError::unavailable(BACKEND, reason.clone()))?
            .clone();
        url.set_path(path);
        url.set_query(None);
        url.query_pairs_mut().append_pair("api-version", &self.api_version);

        let response = match self.send(&url, path, &token).await {
            Err(e) if e.status() == Some(401) && self.tokens.can_refresh() => {
                debug!(path = %path, "Bearer token rejected, requesting a new one");
                self.tokens.invalidate().await;
                let token = self.tokens.ensure_token().await?;
                self.send(&url, path, &token).await?
            }
            other => other?,
        };

        let body = response
            .bytes()
            .await
            .map_err(|e| SecretsError::connection(path, e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| SecretsError::decode(path, e))
    }

    async fn send(
        &self,
        url: &Url,
        path: &str,
        token: &SecretString,
    ) -> Result<reqwest::Response> {
        send_with_retry(&self.retry, path, || {
            self.http.get(url.clone()).bearer_auth(token.expose_secret())
        })
        .await
    }
}
