//! # Backend Client
//!
//! The seam between the fleet poller and the network. [`BackendClient`] is
//! what the poller calls; [`HttpBackend`] is the production implementation
//! that talks plain HTTP to every receiver's state endpoints.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::payload::{CurrentState, InitialState};

pub const CURRENT_STATE_PATH: &str = "/curstate.json";
pub const INITIAL_STATE_PATH: &str = "/initstate.json";

/// Where a backend can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.address, self.port, path)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fetches state documents from one backend server.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Fetch the lightweight health document (`/curstate.json`).
    async fn fetch_current_state(&self, endpoint: &Endpoint) -> Result<CurrentState, FetchError>;

    /// Fetch the full device/profile enumeration (`/initstate.json`).
    async fn fetch_initial_state(&self, endpoint: &Endpoint) -> Result<InitialState, FetchError>;
}

/// [`BackendClient`] over HTTP with separate timeouts for both endpoints.
///
/// The underlying `reqwest::Client` is shared by every request so connections
/// to the backends are pooled.
pub struct HttpBackend {
    client: reqwest::Client,
    health_timeout: Duration,
    bootstrap_timeout: Duration,
}

impl HttpBackend {
    pub fn new(health_timeout: Duration, bootstrap_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(health_timeout.max(bootstrap_timeout))
                .build()
                .unwrap_or_default(),
            health_timeout,
            bootstrap_timeout,
        }
    }

    async fn get_json<T>(&self, url: String, timeout: Duration) -> Result<T, FetchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        serde_json::from_slice(&body).map_err(|source| FetchError::Decode { url, source })
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn fetch_current_state(&self, endpoint: &Endpoint) -> Result<CurrentState, FetchError> {
        self.get_json(endpoint.url(CURRENT_STATE_PATH), self.health_timeout)
            .await
    }

    async fn fetch_initial_state(&self, endpoint: &Endpoint) -> Result<InitialState, FetchError> {
        self.get_json(endpoint.url(INITIAL_STATE_PATH), self.bootstrap_timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let endpoint = Endpoint {
            address: "10.1.2.3".to_string(),
            port: 8073,
        };
        assert_eq!(
            endpoint.url(CURRENT_STATE_PATH),
            "http://10.1.2.3:8073/curstate.json"
        );
        assert_eq!(
            endpoint.url(INITIAL_STATE_PATH),
            "http://10.1.2.3:8073/initstate.json"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let backend = HttpBackend::new(Duration::from_millis(200), Duration::from_millis(200));
        // port 9 on loopback: nothing listens there
        let endpoint = Endpoint {
            address: "127.0.0.1".to_string(),
            port: 9,
        };

        let result = backend.fetch_current_state(&endpoint).await;
        assert!(matches!(result, Err(FetchError::Transport { .. })));
    }
}
