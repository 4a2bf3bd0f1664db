//! Transient-failure retry for backend HTTP calls.
//!
//! Connection-level failures and 5xx responses are retried with capped
//! exponential backoff. Any other non-2xx response is returned immediately as
//! [`SecretsError::Request`] carrying the status code.

use std::time::Duration;

use tracing::warn;

use super::error::{Result, SecretsError};

/// Configuration for retry behavior on transient errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration before first retry
    pub initial_backoff: Duration,
    /// Maximum backoff duration (cap for exponential growth)
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff duration for a given attempt number (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * multiplier;
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }
}

/// Sends the request produced by `build`, retrying transient failures.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed by
/// `send`. `path` only labels errors and log lines.
pub(crate) async fn send_with_retry<F>(
    config: &RetryConfig,
    path: &str,
    mut build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let backoff = config.backoff_for_attempt(attempt);
            warn!(
                path = %path,
                attempt = attempt + 1,
                max_attempts = max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying request after backoff"
            );
            tokio::time::sleep(backoff).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                if !status.is_server_error() {
                    return Err(SecretsError::request(path, status.as_u16()));
                }
                warn!(path = %path, status = status.as_u16(), "Transient server error");
                last_error = Some(SecretsError::request(path, status.as_u16()));
            }
            Err(e) if is_retryable_transport_error(&e) => {
                warn!(path = %path, error = %e, "Transient connection error");
                last_error = Some(SecretsError::connection(path, e.to_string()));
            }
            Err(e) => return Err(SecretsError::connection(path, e.to_string())),
        }
    }

    Err(last_error.unwrap_or_else(|| SecretsError::connection(path, "no attempt was made")))
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_retry_config_backoff_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_config_backoff_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };

        // 100ms * 2^6 = 6400ms, capped at 500ms
        assert_eq!(config.backoff_for_attempt(7), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/forbidden", server.uri());
        let err = send_with_retry(&fast_retry(), "forbidden", || client.get(&url))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/flaky", server.uri());
        let response =
            send_with_retry(&fast_retry(), "flaky", || client.get(&url)).await.unwrap();

        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_server_error_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/down", server.uri());
        let err = send_with_retry(&fast_retry(), "down", || client.get(&url)).await.unwrap_err();

        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn test_connection_failure_becomes_connection_error() {
        // Nothing listens on port 9 of the loopback interface.
        let client = reqwest::Client::new();
        let err = send_with_retry(&fast_retry(), "unreachable", || {
            client.get("http://127.0.0.1:9/unreachable")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SecretsError::Connection { .. }));
    }
}
