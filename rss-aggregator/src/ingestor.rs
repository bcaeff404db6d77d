use crate::fetcher::ProxyFetcher;
use crate::parser::FeedParser;
use crate::proxy::{try_in_order, Fallback, ProxyBackend};
use crate::types::{Article, FailureRecord, Source};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    /// Parsed at least one article.
    Fetched { backend: String },
    /// Fetched and parsed fine, but the feed had nothing usable.
    Empty { backend: String },
    /// Every backend failed, or the payload could not be parsed.
    Failed,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source_id: String,
    pub status: IngestStatus,
    pub articles: Vec<Article>,
    pub failure: Option<FailureRecord>,
}

impl IngestReport {
    fn failed(source: &Source) -> Self {
        Self {
            source_id: source.id.clone(),
            status: IngestStatus::Failed,
            articles: Vec::new(),
            failure: Some(FailureRecord::for_source(source)),
        }
    }
}

/// Per-source orchestration: walk the proxy chain once, parse the first
/// payload that arrives. Errors never escape; they become a
/// [`FailureRecord`] on the report.
pub struct SourceIngestor {
    fetcher: ProxyFetcher,
    chain: Vec<ProxyBackend>,
    parser: FeedParser,
    timeout: Duration,
}

impl SourceIngestor {
    pub fn new(
        fetcher: ProxyFetcher,
        chain: Vec<ProxyBackend>,
        parser: FeedParser,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            chain,
            parser,
            timeout,
        }
    }

    pub async fn ingest(&self, source: &Source) -> IngestReport {
        let outcome = try_in_order(&self.chain, |backend| {
            self.fetcher.fetch(backend, &source.feed_url, self.timeout)
        })
        .await;

        for (backend, e) in outcome.failures() {
            debug!("Proxy {} failed for {}: {}", backend.name, source.id, e);
        }

        let (backend, payload) = match outcome {
            Fallback::Succeeded { strategy, value, .. } => (strategy, value),
            Fallback::Exhausted { failures } => {
                warn!(
                    "All {} proxies failed for {} ({})",
                    failures.len(),
                    source.label,
                    source.feed_url
                );
                return IngestReport::failed(source);
            }
        };

        // A bad payload is not retried on the next proxy.
        let articles = match self.parser.parse(&payload, backend.format, source) {
            Ok(articles) => articles,
            Err(e) => {
                warn!("Failed to parse {} via {}: {}", source.label, backend.name, e);
                return IngestReport::failed(source);
            }
        };

        info!(
            "Ingested {} articles from {} via {}",
            articles.len(),
            source.id,
            backend.name
        );

        let status = if articles.is_empty() {
            IngestStatus::Empty {
                backend: backend.name.clone(),
            }
        } else {
            IngestStatus::Fetched {
                backend: backend.name.clone(),
            }
        };

        IngestReport {
            source_id: source.id.clone(),
            status,
            articles,
            failure: None,
        }
    }
}
