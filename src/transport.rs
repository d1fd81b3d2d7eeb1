//! HTTP transport layer for sending batch payloads to the ingestion endpoint

use crate::config::Config;
use crate::errors::TransportError;
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Acknowledgement returned by a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

/// Sender for serialized batches
///
/// Implementations must tolerate concurrent calls. Any retry policy lives
/// here; callers treat every returned error as final.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<Ack, TransportError>;
}

/// Access key pair attached to every request
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.access_key, Some(&self.secret_key))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Build the shared reqwest client
pub(crate) fn build_client(http_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(http_timeout)
        .user_agent(format!("log_shipper/{}", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Turn a non-success response into a [`TransportError::Status`]
pub(crate) async fn check_response(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Posts payloads to `{host}/v2/repos/{repo}/data`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    credentials: Credentials,
    timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl HttpTransport {
    pub fn new(
        pipeline_host: &str,
        repo: &str,
        credentials: Credentials,
        http_timeout: Duration,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(http_timeout)?,
            url: format!("{}/v2/repos/{}/data", pipeline_host.trim_end_matches('/'), repo),
            credentials,
            timeout: http_timeout,
            max_retries,
            retry_backoff_ms,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            &config.pipeline_host,
            &config.pipeline_repo,
            Credentials::new(&config.access_key, &config.secret_key),
            config.http_timeout(),
            config.max_retries,
            config.retry_backoff_ms,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Single attempt to send a payload
    async fn send_attempt(&self, payload: Vec<u8>) -> Result<Ack, TransportError> {
        let request = self
            .credentials
            .apply(self.client.post(&self.url))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(payload);

        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| TransportError::Timeout)??;

        let response = check_response(response).await?;
        Ok(Ack {
            status: response.status().as_u16(),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_backoff_ms.saturating_mul(2_u64.saturating_pow(attempt - 1));
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Vec<u8>) -> Result<Ack, TransportError> {
        debug!("Sending {} bytes to {}", payload.len(), self.url);

        let mut attempt = 0;
        loop {
            match self.send_attempt(payload.clone()).await {
                Ok(ack) => return Ok(ack),
                Err(e) if attempt < self.max_retries && e.is_transient() => {
                    attempt += 1;
                    let backoff = self.backoff(attempt);
                    warn!(
                        "Send to {} failed (attempt {}), retrying in {}ms: {}",
                        self.url,
                        attempt,
                        backoff.as_millis(),
                        e
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
