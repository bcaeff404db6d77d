use crate::types::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A plain HTTP GET seam. The production implementation is
/// [`crate::fetcher::HttpTransport`]; tests substitute scripted backends.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` and return the response body as text.
    ///
    /// Implementations must map a missed deadline to
    /// `AggregatorError::Timeout`, a non-2xx status to
    /// `AggregatorError::Http` and anything else to `AggregatorError::Network`.
    async fn get(&self, url: &str, timeout: Duration) -> Result<String>;
}
