//! HTTP transport to the hub
//!
//! The hub speaks plain HTTP with basic auth on port 25105. Commands go out
//! as query strings; the only response body of interest is the buffer XML.

use async_trait::async_trait;
use insteon_core::Method;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Default hub HTTP port
pub const DEFAULT_PORT: u16 = 25105;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Hub rejected the credentials")]
    Unauthorized,
    #[error("Hub returned HTTP {status} for {path}")]
    Status { status: u16, path: String },
}

/// Status and body of a hub reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Something that can carry a request to the hub
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request; `path` includes the query string
    async fn execute(&self, method: Method, path: &str) -> Result<TransportResponse, TransportError>;
}

/// Where the hub lives and how to log in
#[derive(Debug, Clone)]
pub struct HubAddress {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl HubAddress {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// `reqwest` backed transport
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn new(address: &HubAddress) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(address.timeout)
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            base_url: address.base_url(),
            username: address.username.clone(),
            password: address.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, method: Method, path: &str) -> Result<TransportResponse, TransportError> {
        let url = self.url(path);
        trace!(method = %method, url = %url, "Hub request");

        let request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };

        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|source| TransportError::Request {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                path: path.to_string(),
                source,
            })?;

        debug!(status = status.as_u16(), len = body.len(), "Hub response");

        Ok(TransportResponse {
            status: status.as_u16(),
            body,
        })
    }
}
