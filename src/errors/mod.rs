//! # Error Handling
//!
//! Application-level errors for tpl. Secret backends and the template engine
//! have their own error types ([`SecretsError`], [`TemplateError`]); this enum
//! wraps them together with the process-level failures (unreadable mapping,
//! data or template files) that abort a run before anything is rendered.

use crate::secrets::SecretsError;
use crate::template::TemplateError;

/// Custom result type for tpl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tpl
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Key-mapping file could not be parsed
    #[error("Failed to read record from mapping file {path}")]
    Mapping {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Data definition or data file errors
    #[error("Failed to load data '{name}': {message}")]
    Data { name: String, message: String },

    /// Template parse or execution errors
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Secret backend errors raised outside of a render
    #[error(transparent)]
    Secrets(#[from] SecretsError),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Create a mapping file error
    pub fn mapping<S: Into<String>>(path: S, source: csv::Error) -> Self {
        Self::Mapping { path: path.into(), source }
    }

    /// Create a data loading error
    pub fn data<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self::Data { name: name.into(), message: message.into() }
    }
}
