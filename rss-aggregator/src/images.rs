//! Session image cache and the backfill queue that feeds it.
//!
//! Articles whose feed entry carried no image are queued here. A single
//! worker drains the queue in small concurrent batches, scrapes each article
//! page for a representative image and broadcasts the outcome so the
//! aggregation layer can patch its snapshot in place.

use crate::fetcher::ProxyFetcher;
use crate::proxy::ProxyBackend;
use crate::text::resolve_image_url;
use crate::types::{Article, FetchConfig, ImageResolved};
use futures::future::join_all;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 256;

/// Link → resolved image. `Some(None)` is a negative entry: the link was
/// checked and nothing was found.
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: RwLock<HashMap<String, Option<String>>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, link: &str) -> Option<Option<String>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(link)
            .cloned()
    }

    pub fn contains(&self, link: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(link)
    }

    /// Last write wins.
    pub fn insert(&self, link: &str, image: Option<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(link.to_string(), image);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLookup {
    /// Never checked.
    Unknown,
    /// Checked, nothing usable.
    Missing,
    Found(String),
}

#[derive(Debug, Clone)]
struct BackfillJob {
    article_id: String,
    link: String,
}

#[derive(Default)]
struct BackfillQueue {
    jobs: VecDeque<BackfillJob>,
    queued_links: HashSet<String>,
}

pub struct ImageResolutionService {
    cache: Arc<ImageCache>,
    fetcher: ProxyFetcher,
    backend: ProxyBackend,
    timeout: Duration,
    batch_size: usize,
    queue: Mutex<BackfillQueue>,
    running: AtomicBool,
    events: broadcast::Sender<ImageResolved>,
}

impl ImageResolutionService {
    pub fn new(
        fetcher: ProxyFetcher,
        backend: ProxyBackend,
        cache: Arc<ImageCache>,
        config: &FetchConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            cache,
            fetcher,
            backend,
            timeout: config.image_timeout(),
            batch_size: config.backfill_batch_size.max(1),
            queue: Mutex::new(BackfillQueue::default()),
            running: AtomicBool::new(false),
            events,
        }
    }

    pub fn cache(&self) -> Arc<ImageCache> {
        self.cache.clone()
    }

    pub fn lookup(&self, link: &str) -> ImageLookup {
        match self.cache.get(link) {
            None => ImageLookup::Unknown,
            Some(None) => ImageLookup::Missing,
            Some(Some(image)) => ImageLookup::Found(image),
        }
    }

    /// Receive one [`ImageResolved`] per processed link.
    pub fn subscribe(&self) -> broadcast::Receiver<ImageResolved> {
        self.events.subscribe()
    }

    /// Queue `article` for backfill. Returns false when the article already
    /// has an outcome or its link is cached or already queued.
    pub fn enqueue(&self, article: &Article) -> bool {
        if !article.image_loading || self.cache.contains(&article.link) {
            return false;
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if !queue.queued_links.insert(article.link.clone()) {
            return false;
        }
        queue.jobs.push_back(BackfillJob {
            article_id: article.id.clone(),
            link: article.link.clone(),
        });
        true
    }

    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the worker unless one is already draining the queue.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<usize>> {
        if self.is_running() {
            return None;
        }
        let service = Arc::clone(self);
        Some(tokio::spawn(async move { service.process_queue().await }))
    }

    /// Drain the queue batch by batch until it is empty.
    ///
    /// Non-reentrant: returns 0 immediately when another worker is active.
    /// Returns the number of links processed.
    pub async fn process_queue(&self) -> usize {
        if self.running.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let mut processed = 0;
        loop {
            let batch = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                let take = queue.jobs.len().min(self.batch_size);
                let batch: Vec<BackfillJob> = queue.jobs.drain(..take).collect();
                if batch.is_empty() {
                    // Cleared under the queue lock so a concurrent enqueue
                    // either lands in this drain or sees the worker stopped.
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
                batch
            };

            processed += batch.len();
            join_all(batch.into_iter().map(|job| self.resolve(job))).await;
        }

        if processed > 0 {
            info!("Image backfill processed {} links", processed);
        }
        processed
    }

    async fn resolve(&self, job: BackfillJob) {
        let image = match self.fetcher.fetch(&self.backend, &job.link, self.timeout).await {
            Ok(html) => extract_page_image(&html, &job.link),
            Err(e) => {
                debug!("Image backfill failed for {}: {}", job.link, e);
                None
            }
        };

        self.cache.insert(&job.link, image.clone());
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queued_links
            .remove(&job.link);
        // No subscribers is fine; the cache already holds the outcome.
        let _ = self.events.send(ImageResolved {
            article_id: job.article_id,
            link: job.link,
            image,
        });
    }
}

/// Pick a representative image from an article page: Open Graph, then
/// Twitter card, then the first image inside a common content container.
pub fn extract_page_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let meta = |selector: &str| -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|content| !content.is_empty())
            .map(str::to_string)
    };

    let found = meta(r#"meta[property="og:image"]"#)
        .or_else(|| meta(r#"meta[name="twitter:image"]"#))
        .or_else(|| {
            let selector =
                Selector::parse("article img, .post-thumbnail img, .featured-image img").ok()?;
            document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("src"))
                .map(str::trim)
                .filter(|src| !src.is_empty())
                .map(str::to_string)
        })?;

    Some(resolve_image_url(page_url, &found))
}
