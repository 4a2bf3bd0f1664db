//! Secret resolution for templates.
//!
//! Templates read secrets from two backends:
//! - **HashiCorp Vault**: a single logical read returning a record, from which
//!   one field is picked ([`VaultSecretClient`]);
//! - **Azure Key Vault**: list the versions of a secret, then fetch the most
//!   recently created one ([`AzureSecretClient`]).
//!
//! Both clients run the caller's logical path through a [`KeyResolver`]
//! first, which applies the backend's prefix and key-mapping overrides.
//!
//! Clients are owned by a [`SecretRegistry`], which builds each one lazily on
//! first use from a configuration snapshot taken from the environment. A
//! backend with incomplete configuration still yields a client; it logs a
//! warning per missing variable and fails every read with
//! [`SecretsError::Unavailable`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tpl::secrets::{load_key_mapping, SecretRegistry};
//!
//! let mut registry = SecretRegistry::from_env();
//! registry.set_vault_prefix("prod/");
//! registry.set_vault_mapping(load_key_mapping("vault-mapping.csv")?);
//!
//! let password = registry.vault_secret("app/db", "password").await?;
//! ```

pub mod azure;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod token;
pub mod types;
pub mod vault;

pub use azure::{select_latest_version, AzureConfig, AzureSecretClient, SecretVersion};
pub use error::{Result, SecretsError};
pub use registry::SecretRegistry;
pub use resolver::{
    load_key_mapping, parse_key_mapping, resolve, KeyMapping, KeyResolver, PathSanitizer,
};
pub use retry::RetryConfig;
pub use token::TokenProvider;
pub use types::SecretString;
pub use vault::{VaultConfig, VaultSecretClient, VaultSession};
