use crate::proxy::{Envelope, ProxyBackend};
use crate::traits::Transport;
use crate::types::{AggregatorError, FetchConfig, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// reqwest-backed [`Transport`].
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| AggregatorError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> AggregatorError {
    if e.is_timeout() {
        AggregatorError::Timeout(timeout)
    } else if let Some(status) = e.status() {
        AggregatorError::Http {
            status: status.as_u16(),
        }
    } else {
        AggregatorError::Network(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String> {
        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| classify(e, timeout))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AggregatorError::Http {
                    status: status.as_u16(),
                });
            }

            response.text().await.map_err(|e| classify(e, timeout))
        };

        // One deadline covers connect, headers and body.
        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| AggregatorError::Timeout(timeout))?
    }
}

#[derive(Deserialize)]
struct ContentsEnvelope {
    contents: Option<String>,
}

/// Issues single GETs through one proxy relay. Never retries.
#[derive(Clone)]
pub struct ProxyFetcher {
    transport: Arc<dyn Transport>,
}

impl ProxyFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn http(config: &FetchConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Fetch `target_url` through `backend` and return the unwrapped payload.
    pub async fn fetch(
        &self,
        backend: &ProxyBackend,
        target_url: &str,
        timeout: Duration,
    ) -> Result<String> {
        let url = backend.request_url(target_url);
        let timeout = backend.effective_timeout(timeout);
        let started = Instant::now();

        debug!("Fetching {} via {}", target_url, backend.name);
        let body = self.transport.get(&url, timeout).await?;
        debug!(
            "Fetched {} via {} ({} bytes in {}ms)",
            target_url,
            backend.name,
            body.len(),
            started.elapsed().as_millis()
        );

        unwrap_envelope(backend.envelope, body)
    }
}

pub fn unwrap_envelope(envelope: Envelope, body: String) -> Result<String> {
    match envelope {
        Envelope::Raw => Ok(body),
        Envelope::JsonContents => {
            let wrapped: ContentsEnvelope = serde_json::from_str(&body)
                .map_err(|e| AggregatorError::Parse(format!("Invalid proxy envelope: {}", e)))?;
            wrapped
                .contents
                .ok_or_else(|| AggregatorError::Parse("Proxy envelope has no contents".to_string()))
        }
    }
}
