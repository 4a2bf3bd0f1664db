//! # tpl
//!
//! Renders text templates against a "world" of runtime data: environment
//! variables, host information, local data files and secrets fetched on
//! demand from HashiCorp Vault and Azure Key Vault.
//!
//! ## Architecture
//!
//! ```text
//! CLI → RenderConfig → World (context + functions) → Template engine
//!                          ↓
//!                   SecretRegistry → VaultSecretClient / AzureSecretClient
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tpl::{secrets::SecretRegistry, template::Delimiters, world::World};
//!
//! #[tokio::main]
//! async fn main() -> tpl::Result<()> {
//!     let world = World::new(Arc::new(SecretRegistry::from_env()));
//!     let output = world
//!         .render(r#"password={{ vault "secret/app/db" "password" }}"#, &Delimiters::default())
//!         .await?;
//!     print!("{}", output);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod secrets;
pub mod template;
pub mod world;

// Re-export commonly used types
pub use config::RenderConfig;
pub use errors::{Error, Result};
pub use world::World;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
