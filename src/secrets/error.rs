//! Error types for secret resolution.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while resolving a secret from a backend.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// The backend has no usable client (configuration was incomplete at startup).
    #[error("{backend} backend unavailable: {reason}")]
    Unavailable { backend: &'static str, reason: String },

    /// The bearer token exchange failed.
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The backend answered with a non-2xx status.
    #[error("Request to {path} failed with status {status}")]
    Request { path: String, status: u16 },

    /// The backend could not be reached, even after retrying.
    #[error("Connection to {path} failed: {message}")]
    Connection { path: String, message: String },

    /// The response body could not be decoded.
    #[error("Failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Secret (or secret version) not found in the backend.
    #[error("Secret not found: {path}")]
    NotFound { path: String },

    /// The secret exists but does not carry the requested field.
    #[error("{path} has no field named '{field}'")]
    FieldNotFound { path: String, field: String },

    /// A backend URL could not be built from configuration.
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl SecretsError {
    /// Create an unavailable error.
    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable { backend, reason: reason.into() }
    }

    /// Create an authentication error without an underlying cause.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), source: None }
    }

    /// Create an authentication error wrapping the underlying cause.
    pub fn authentication_with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Authentication { message: message.into(), source: Some(source.into()) }
    }

    /// Create a request error for a non-2xx status.
    pub fn request(path: impl Into<String>, status: u16) -> Self {
        Self::Request { path: path.into(), status }
    }

    /// Create a connection error.
    pub fn connection(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection { path: path.into(), message: message.into() }
    }

    /// Create a decode error.
    pub fn decode(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode { path: path.into(), source }
    }

    /// Create a not found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a field not found error.
    pub fn field_not_found(path: impl Into<String>, field: impl Into<String>) -> Self {
        Self::FieldNotFound { path: path.into(), field: field.into() }
    }

    /// HTTP status carried by a request error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::not_found("app/db");
        assert!(matches!(err, SecretsError::NotFound { .. }));
        assert_eq!(err.to_string(), "Secret not found: app/db");

        let err = SecretsError::unavailable("Vault", "VAULT_TOKEN not set");
        assert_eq!(err.to_string(), "Vault backend unavailable: VAULT_TOKEN not set");

        let err = SecretsError::request("secrets/db/versions", 403);
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_field_not_found_names_field() {
        let err = SecretsError::field_not_found("app/db", "missing");
        assert_eq!(err.to_string(), "app/db has no field named 'missing'");
    }

    #[test]
    fn test_authentication_keeps_source() {
        use std::error::Error as _;

        let cause = std::io::Error::new(std::io::ErrorKind::Other, "tls handshake");
        let err = SecretsError::authentication_with_source("token request failed", cause);
        assert!(err.source().is_some());
        assert!(SecretsError::authentication("no credentials").source().is_none());
    }
}
