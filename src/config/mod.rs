//! # Configuration Management
//!
//! Run configuration assembled from command-line flags. Backend credentials
//! are not part of it: they come from the environment through
//! [`VaultConfig::from_env`] and [`AzureConfig::from_env`].

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::secrets::{load_key_mapping, AzureConfig, PathSanitizer, SecretRegistry, VaultConfig};
use crate::template::Delimiters;
use crate::world::load_data;

/// Where the template is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Stdin,
    File(PathBuf),
}

impl TemplateSource {
    /// `-` means standard input.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

/// Prefix and key-mapping settings of one secret backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    pub prefix: String,
    pub mapping_file: Option<PathBuf>,
}

/// Everything one `tpl` run needs.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub template: TemplateSource,
    pub output: Option<PathBuf>,
    pub vault: BackendOptions,
    pub azure: BackendOptions,
    pub azure_sanitize_paths: bool,
    pub data: Vec<String>,
    pub delimiters: Delimiters,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            template: TemplateSource::Stdin,
            output: None,
            vault: BackendOptions::default(),
            azure: BackendOptions::default(),
            azure_sanitize_paths: false,
            data: Vec::new(),
            delimiters: Delimiters::default(),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.delimiters.left.is_empty() {
            return Err(Error::config("left delimiter cannot be empty"));
        }
        if self.delimiters.right.is_empty() {
            return Err(Error::config("right delimiter cannot be empty"));
        }
        Ok(())
    }

    /// Builds the secret registry over the given backend configuration.
    ///
    /// Mapping files are loaded here, so an unreadable one fails the run
    /// before any secret is requested.
    pub fn secret_registry(
        &self,
        vault: VaultConfig,
        azure: AzureConfig,
    ) -> Result<SecretRegistry> {
        let mut registry = SecretRegistry::new(vault, azure);

        registry.set_vault_prefix(self.vault.prefix.clone());
        registry.set_vault_mapping(load_mapping(self.vault.mapping_file.as_deref())?);

        registry.set_azure_prefix(self.azure.prefix.clone());
        registry.set_azure_mapping(load_mapping(self.azure.mapping_file.as_deref())?);
        if self.azure_sanitize_paths {
            registry.set_azure_sanitizer(PathSanitizer::AzureSecretName);
        }

        Ok(registry)
    }

    /// Loads the `--data` documents relative to `base_dir`.
    pub fn load_data(&self, base_dir: &Path) -> Result<Map<String, Value>> {
        load_data(&self.data, base_dir)
    }
}

fn load_mapping(path: Option<&Path>) -> Result<crate::secrets::KeyMapping> {
    match path {
        Some(path) => load_key_mapping(path),
        None => Ok(Default::default()),
    }
}
