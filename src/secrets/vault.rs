//! HashiCorp Vault client.
//!
//! Secrets are read with a single logical read of the resolved path, so
//! `secret/app/db` is `GET {address}/v1/secret/app/db`. Each read returns a
//! record of field/value pairs and the caller picks one field.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rustify::endpoint::Endpoint;
use rustify::enums::{RequestMethod, RequestType, ResponseType};
use serde_json::Value;
use tracing::{debug, info};
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;

use super::error::{Result, SecretsError};
use super::resolver::KeyResolver;
use super::types::SecretString;

pub const VAULT_ADDR: &str = "VAULT_ADDR";
pub const VAULT_TOKEN: &str = "VAULT_TOKEN";
pub const VAULT_NAMESPACE: &str = "VAULT_NAMESPACE";

const BACKEND: &str = "Vault";

/// A secret record: field name to value.
pub type SecretRecord = HashMap<String, Value>;

/// Vault connection settings, read once from the environment.
#[derive(Debug, Clone, Default)]
pub struct VaultConfig {
    /// Vault server address
    pub address: Option<String>,
    /// Pre-issued Vault token
    pub token: Option<SecretString>,
    /// Vault namespace (for Enterprise)
    pub namespace: Option<String>,
}

impl VaultConfig {
    /// Load configuration from `VAULT_ADDR`, `VAULT_TOKEN` and
    /// `VAULT_NAMESPACE`.
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
            address: get(VAULT_ADDR),
            token: get(VAULT_TOKEN).map(SecretString::new),
            namespace: get(VAULT_NAMESPACE),
        }
    }

    /// Names of the required variables that are not set.
    pub fn missing_values(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.address.is_none() {
            missing.push(VAULT_ADDR);
        }
        if self.token.is_none() {
            missing.push(VAULT_TOKEN);
        }
        missing
    }
}

/// An authenticated session able to perform logical reads.
#[async_trait]
pub trait VaultSession: Send + Sync + std::fmt::Debug {
    /// Reads the record at `path`. `Ok(None)` means the path holds no data.
    async fn read(&self, path: &str) -> Result<Option<SecretRecord>>;
}

/// [`VaultSession`] backed by a `vaultrs` client.
pub struct VaultrsSession {
    client: VaultClient,
}

impl std::fmt::Debug for VaultrsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultrsSession").field("client", &"[VaultClient]").finish()
    }
}

impl VaultrsSession {
    /// Builds a session from an address and token.
    pub fn connect(
        address: &str,
        token: &SecretString,
        namespace: Option<&str>,
    ) -> std::result::Result<Self, String> {
        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(address);
        settings_builder.token(token.expose_secret());
        if let Some(namespace) = namespace {
            settings_builder.namespace(Some(namespace.to_string()));
        }

        let settings = settings_builder
            .build()
            .map_err(|e| format!("invalid Vault configuration: {}", e))?;
        let client = VaultClient::new(settings)
            .map_err(|e| format!("failed to create Vault client: {}", e))?;

        Ok(Self { client })
    }
}

/// `GET /v1/{path}` of an arbitrary logical path.
#[derive(Debug)]
struct LogicalRead {
    path: String,
}

impl Endpoint for LogicalRead {
    type Response = SecretRecord;
    const REQUEST_BODY_TYPE: RequestType = RequestType::JSON;
    const RESPONSE_BODY_TYPE: ResponseType = ResponseType::JSON;

    fn path(&self) -> String {
        self.path.clone()
    }

    fn method(&self) -> RequestMethod {
        RequestMethod::GET
    }
}

#[async_trait]
impl VaultSession for VaultrsSession {
    async fn read(&self, path: &str) -> Result<Option<SecretRecord>> {
        let endpoint = LogicalRead { path: path.to_string() };

        match vaultrs::api::exec_with_result(&self.client, endpoint).await {
            Ok(record) => Ok(Some(record)),
            Err(ClientError::APIError { code: 404, .. })
            | Err(ClientError::ResponseDataEmptyError) => Ok(None),
            Err(ClientError::APIError { code, .. }) => Err(SecretsError::request(path, code)),
            Err(e) => Err(SecretsError::connection(path, e.to_string())),
        }
    }
}

/// Client for Vault secrets.
#[derive(Debug)]
pub struct VaultSecretClient {
    session: std::result::Result<Arc<dyn VaultSession>, String>,
    resolver: KeyResolver,
}

impl VaultSecretClient {
    /// Creates a client. Construction never fails: without an address and a
    /// token the client is unavailable and every read fails without network
    /// I/O.
    pub fn new(config: &VaultConfig, resolver: KeyResolver) -> Self {
        let session = match (&config.address, &config.token) {
            (Some(address), Some(token)) => {
                VaultrsSession::connect(address, token, config.namespace.as_deref()).map(|session| {
                    info!(address = %address, "Initialized Vault client");
                    Arc::new(session) as Arc<dyn VaultSession>
                })
            }
            _ => Err(format!("{} not set", config.missing_values().join(" and "))),
        };
        Self { session, resolver }
    }

    /// Creates a client over an existing session.
    pub fn with_session(session: Arc<dyn VaultSession>, resolver: KeyResolver) -> Self {
        Self { session: Ok(session), resolver }
    }

    pub fn is_available(&self) -> bool {
        self.session.is_ok()
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut KeyResolver {
        &mut self.resolver
    }

    /// Reads `field` of the secret at `path`.
    pub async fn get_secret(&self, path: &str, field: &str) -> Result<String> {
        if path.is_empty() {
            return Err(SecretsError::not_found(path));
        }

        let session = self
            .session
            .as_ref()
            .map_err(|reason| SecretsError::unavailable(BACKEND, reason.clone()))?;

        let resolved = self.resolver.resolve(path);
        debug!(path = %path, resolved = %resolved, field = %field, "Reading Vault secret");

        let record = session
            .read(&resolved)
            .await?
            .ok_or_else(|| SecretsError::not_found(resolved.clone()))?;
        let value = record
            .get(field)
            .ok_or_else(|| SecretsError::field_not_found(resolved.clone(), field))?;

        Ok(stringify(value))
    }
}

/// Strings are returned verbatim; other values in their JSON form.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
