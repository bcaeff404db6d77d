use crate::fetcher::ProxyFetcher;
use crate::images::{ImageCache, ImageLookup, ImageResolutionService};
use crate::ingestor::{IngestReport, SourceIngestor};
use crate::parser::FeedParser;
use crate::proxy::{PayloadFormat, ProxyBackend};
use crate::types::{AggregatorError, Article, FailureRecord, FetchConfig, ImageResolved, Result, Source};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The committed result of the latest refresh, patched in place as images
/// resolve.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    /// Generation of the refresh that produced `articles`; 0 before the first
    /// commit.
    pub generation: u64,
    pub articles: Vec<Article>,
    pub failures: Vec<FailureRecord>,
}

impl FeedSnapshot {
    pub fn failed_labels(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.source_label.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub generation: u64,
    /// False when a newer refresh started before this one settled; its
    /// results were discarded.
    pub committed: bool,
    pub articles: Vec<Article>,
    pub failures: Vec<FailureRecord>,
}

pub struct AggregationEngine {
    ingestor: SourceIngestor,
    images: Arc<ImageResolutionService>,
    snapshot: RwLock<FeedSnapshot>,
    latest_generation: AtomicU64,
}

impl AggregationEngine {
    pub fn new(ingestor: SourceIngestor, images: Arc<ImageResolutionService>) -> Self {
        Self {
            ingestor,
            images,
            snapshot: RwLock::new(FeedSnapshot::default()),
            latest_generation: AtomicU64::new(0),
        }
    }

    /// Wire up the production stack around one fetcher and one image cache.
    /// Backfill goes through the first raw-feed backend of the chain.
    pub fn with_fetcher(
        fetcher: ProxyFetcher,
        chain: Vec<ProxyBackend>,
        config: &FetchConfig,
    ) -> Result<Self> {
        if chain.is_empty() {
            return Err(AggregatorError::Config("Proxy chain is empty".to_string()));
        }
        // Article pages are HTML; a feed-to-JSON backend cannot relay them.
        let image_backend = chain
            .iter()
            .find(|backend| backend.format == PayloadFormat::Xml)
            .cloned()
            .unwrap_or_else(ProxyBackend::codetabs);

        let cache = Arc::new(ImageCache::new());
        let parser = FeedParser::new(config, cache.clone());
        let images = Arc::new(ImageResolutionService::new(
            fetcher.clone(),
            image_backend,
            cache,
            config,
        ));
        let ingestor = SourceIngestor::new(fetcher, chain, parser, config.feed_timeout());

        Ok(Self::new(ingestor, images))
    }

    pub fn images(&self) -> Arc<ImageResolutionService> {
        self.images.clone()
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest_generation.load(Ordering::SeqCst)
    }

    /// Ingest every source concurrently, merge once all have settled, and
    /// commit if no newer refresh has started in the meantime.
    pub async fn refresh(&self, sources: &[Source]) -> RefreshOutcome {
        let generation = self.latest_generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Refresh {} started for {} sources", generation, sources.len());

        let reports = join_all(sources.iter().map(|source| self.ingestor.ingest(source))).await;
        let (mut articles, failures) = merge_reports(reports);

        let mut snapshot = self.snapshot.write().await;
        if self.latest_generation() != generation {
            warn!(
                "Refresh {} superseded by {}; discarding {} articles",
                generation,
                self.latest_generation(),
                articles.len()
            );
            return RefreshOutcome {
                generation,
                committed: false,
                articles,
                failures,
            };
        }

        // Backfill may have settled some links after this pass parsed them;
        // their events went to the previous snapshot.
        let settled = self.settle_from_cache(&mut articles);
        if settled > 0 {
            debug!("Settled {} articles from the image cache at commit", settled);
        }

        *snapshot = FeedSnapshot {
            generation,
            articles: articles.clone(),
            failures: failures.clone(),
        };
        drop(snapshot);

        let queued = articles
            .iter()
            .filter(|article| self.images.enqueue(article))
            .count();
        if queued > 0 {
            debug!("Queued {} articles for image backfill", queued);
            self.images.start();
        }

        info!(
            "Refresh {} committed: {} articles, {} failed sources",
            generation,
            articles.len(),
            failures.len()
        );

        RefreshOutcome {
            generation,
            committed: true,
            articles,
            failures,
        }
    }

    fn settle_from_cache(&self, articles: &mut [Article]) -> usize {
        let mut settled = 0;
        for article in articles.iter_mut().filter(|a| a.image_loading) {
            match self.images.lookup(&article.link) {
                ImageLookup::Unknown => continue,
                ImageLookup::Missing => {}
                ImageLookup::Found(image) => article.image = Some(image),
            }
            article.image_loading = false;
            settled += 1;
        }
        settled
    }

    /// Patch every article sharing the resolved link. Returns how many
    /// articles changed.
    pub async fn apply_image(&self, resolved: &ImageResolved) -> usize {
        let mut snapshot = self.snapshot.write().await;
        let mut patched = 0;
        for article in snapshot
            .articles
            .iter_mut()
            .filter(|a| a.id == resolved.article_id || a.link == resolved.link)
        {
            if resolved.image.is_some() {
                article.image = resolved.image.clone();
            }
            article.image_loading = false;
            patched += 1;
        }
        patched
    }

    /// Apply image events for as long as the engine is alive.
    pub fn spawn_image_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.images.subscribe();
        let engine: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(resolved) => {
                        let Some(live) = engine.upgrade() else {
                            break;
                        };
                        live.apply_image(&resolved).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Image listener lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Merge per-source reports in configuration order: collapse duplicate ids,
/// drop untitled stragglers, newest first with undated entries last.
pub fn merge_reports(reports: Vec<IngestReport>) -> (Vec<Article>, Vec<FailureRecord>) {
    let mut seen = HashSet::new();
    let mut articles = Vec::new();
    let mut failures = Vec::new();

    for report in reports {
        failures.extend(report.failure);
        for article in report.articles {
            if article.title.trim().is_empty() {
                continue;
            }
            if seen.insert(article.id.clone()) {
                articles.push(article);
            }
        }
    }

    sort_by_recency(&mut articles);
    (articles, failures)
}

/// Stable: equal dates keep fetch order.
pub fn sort_by_recency(articles: &mut [Article]) {
    articles.sort_by(|a, b| match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
