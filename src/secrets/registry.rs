//! Secret client registry
//!
//! Holds one long-lived client per backend. Each client is built on first use
//! from the configuration snapshot the registry was created with, and the
//! same instance is returned for the rest of the registry's life.

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::azure::{AzureConfig, AzureSecretClient};
use super::error::Result;
use super::resolver::{KeyMapping, KeyResolver, PathSanitizer};
use super::retry::RetryConfig;
use super::vault::{VaultConfig, VaultSecretClient};

/// Registry of the Vault and Azure Key Vault clients.
#[derive(Debug, Default)]
pub struct SecretRegistry {
    vault_config: VaultConfig,
    azure_config: AzureConfig,
    vault_resolver: KeyResolver,
    azure_resolver: KeyResolver,
    retry: Option<RetryConfig>,
    vault: OnceCell<VaultSecretClient>,
    azure: OnceCell<AzureSecretClient>,
}

impl SecretRegistry {
    /// Create a registry over explicit configuration snapshots.
    pub fn new(vault_config: VaultConfig, azure_config: AzureConfig) -> Self {
        Self { vault_config, azure_config, ..Default::default() }
    }

    /// Create a registry from the process environment.
    pub fn from_env() -> Self {
        Self::new(VaultConfig::from_env(), AzureConfig::from_env())
    }

    /// Overrides the retry policy of clients built by this registry.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// The Vault client, built on first call.
    pub fn vault_client(&self) -> &VaultSecretClient {
        self.vault.get_or_init(|| {
            for name in self.vault_config.missing_values() {
                warn!(variable = name, "{} not set, Vault secrets are unavailable", name);
            }
            debug!("Creating Vault client");
            VaultSecretClient::new(&self.vault_config, self.vault_resolver.clone())
        })
    }

    /// The Azure Key Vault client, built on first call.
    pub fn azure_client(&self) -> &AzureSecretClient {
        self.azure.get_or_init(|| {
            for name in self.azure_config.missing_values() {
                warn!(variable = name, "{} not set, Azure Key Vault secrets are unavailable", name);
            }
            debug!("Creating Azure Key Vault client");
            let client =
                AzureSecretClient::new(self.azure_config.clone(), self.azure_resolver.clone());
            match &self.retry {
                Some(retry) => client.with_retry_config(retry.clone()),
                None => client,
            }
        })
    }

    /// Reads `field` of the Vault secret at `path`.
    pub async fn vault_secret(&self, path: &str, field: &str) -> Result<String> {
        self.vault_client().get_secret(path, field).await
    }

    /// Reads the latest version of the Azure secret at `path`.
    pub async fn azure_secret(&self, path: &str) -> Result<String> {
        self.azure_client().get_secret(path).await
    }

    pub fn set_vault_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        self.update_vault(|resolver| resolver.set_prefix(prefix.clone()));
    }

    pub fn set_vault_mapping(&mut self, mapping: KeyMapping) {
        self.update_vault(|resolver| resolver.set_mapping(mapping.clone()));
    }

    pub fn set_azure_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        self.update_azure(|resolver| resolver.set_prefix(prefix.clone()));
    }

    pub fn set_azure_mapping(&mut self, mapping: KeyMapping) {
        self.update_azure(|resolver| resolver.set_mapping(mapping.clone()));
    }

    pub fn set_azure_sanitizer(&mut self, sanitizer: PathSanitizer) {
        self.update_azure(|resolver| resolver.set_sanitizer(sanitizer));
    }

    // Settings go to the stored resolver and to the client if it already exists.
    fn update_vault<F: Fn(&mut KeyResolver)>(&mut self, apply: F) {
        apply(&mut self.vault_resolver);
        if let Some(client) = self.vault.get_mut() {
            apply(client.resolver_mut());
        }
    }

    fn update_azure<F: Fn(&mut KeyResolver)>(&mut self, apply: F) {
        apply(&mut self.azure_resolver);
        if let Some(client) = self.azure.get_mut() {
            apply(client.resolver_mut());
        }
    }
}
