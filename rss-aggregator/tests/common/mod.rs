#![allow(dead_code)]

// Shared fixtures for the integration tests: a scripted transport that never
// touches the network, plus feed and source builders.

pub use techhub_aggregator::proxy::{default_feed_chain, ProxyBackend};
pub use techhub_aggregator::{
    AggregationEngine, AggregatorError, Article, FetchConfig, ProxyFetcher, Source, Transport,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Clone)]
enum Reply {
    Body(String),
    Status(u16),
    Timeout,
}

#[derive(Clone)]
struct Route {
    reply: Reply,
    delay: Duration,
}

/// Answers GETs from a table keyed by the full request URL. Unknown URLs
/// fail with a network error. Every call is recorded.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(&self, url: String, reply: Reply, delay: Duration) {
        self.routes.lock().unwrap().insert(url, Route { reply, delay });
    }

    pub fn respond(&self, url: impl Into<String>, body: impl Into<String>) {
        self.route(url.into(), Reply::Body(body.into()), Duration::ZERO);
    }

    pub fn respond_after(&self, url: impl Into<String>, body: impl Into<String>, delay: Duration) {
        self.route(url.into(), Reply::Body(body.into()), delay);
    }

    pub fn fail_status(&self, url: impl Into<String>, status: u16) {
        self.route(url.into(), Reply::Status(status), Duration::ZERO);
    }

    pub fn time_out(&self, url: impl Into<String>) {
        self.route(url.into(), Reply::Timeout, Duration::ZERO);
    }

    /// Serve `body` for `target` when requested through `backend`.
    pub fn respond_via(&self, backend: &ProxyBackend, target: &str, body: impl Into<String>) {
        self.respond(backend.request_url(target), body);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls().iter().filter(|url| url.contains(needle)).count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str, timeout: Duration) -> techhub_aggregator::Result<String> {
        self.calls.lock().unwrap().push(url.to_string());
        let route = self.routes.lock().unwrap().get(url).cloned();

        let Some(route) = route else {
            return Err(AggregatorError::Network(format!("connection refused: {}", url)));
        };
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        match route.reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(AggregatorError::Http { status }),
            Reply::Timeout => Err(AggregatorError::Timeout(timeout)),
        }
    }
}

pub fn source(id: &str, category: &str) -> Source {
    Source {
        id: id.to_string(),
        category_id: category.to_string(),
        label: id.to_uppercase(),
        short_label: id[..1].to_uppercase(),
        feed_url: format!("https://{}.test/feed.xml", id),
        color: "#000".to_string(),
        background: "#fff".to_string(),
        domain: Some(format!("{}.test", id)),
    }
}

pub struct Item<'a> {
    pub title: &'a str,
    pub link: &'a str,
    pub date: &'a str,
    pub extra: &'a str,
}

pub fn item<'a>(title: &'a str, link: &'a str, date: &'a str) -> Item<'a> {
    Item {
        title,
        link,
        date,
        extra: "",
    }
}

pub fn rss(items: &[Item]) -> String {
    let body: String = items
        .iter()
        .map(|i| {
            format!(
                "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate><description>Summary of {}</description>{}</item>",
                i.title, i.link, i.date, i.title, i.extra
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"><channel><title>t</title>{}</channel></rss>"#,
        body
    )
}

/// `n` dated items with links under `https://{host}/`, newest first.
pub fn numbered_rss(host: &str, n: usize, day: u32) -> String {
    let items: Vec<(String, String, String)> = (0..n)
        .map(|i| {
            (
                format!("{} story {}", host, i),
                format!("https://{}/post/{}", host, i),
                format!("2024-01-{:02}T{:02}:00:00Z", day, 23 - i.min(23)),
            )
        })
        .collect();
    let refs: Vec<Item> = items
        .iter()
        .map(|(t, l, d)| item(t, l, d))
        .collect();
    rss(&refs)
}

/// A page whose Open Graph image is `image`.
pub fn page_with_og(image: &str) -> String {
    format!(
        r#"<html><head><meta property="og:image" content="{}"></head><body></body></html>"#,
        image
    )
}
