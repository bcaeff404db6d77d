use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use interfaces::defs::{Article, Category, FailureRecord, ImageResolved, Source, ALL};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub feed_timeout_ms: u64,
    pub image_timeout_ms: u64,
    pub max_entries_per_feed: usize,
    pub description_max_chars: usize,
    pub backfill_batch_size: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "TechHub-Aggregator/1.0".to_string(),
            feed_timeout_ms: 8_000,
            image_timeout_ms: 5_000,
            max_entries_per_feed: 8,
            description_max_chars: 160,
            backfill_batch_size: 5,
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {status}")]
    Http { status: u16 },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
