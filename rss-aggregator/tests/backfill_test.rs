mod common;

use common::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use techhub_aggregator::{ImageCache, ImageLookup, ImageResolutionService};

fn pending_article(n: usize) -> Article {
    let link = format!("https://news.test/story/{}", n);
    Article {
        id: Article::identity(&link, "news"),
        title: format!("Story {}", n),
        description: String::new(),
        link,
        image: None,
        image_loading: true,
        published_raw: String::new(),
        published_at: None,
        source_id: "news".to_string(),
        category_id: "ai".to_string(),
    }
}

fn service_over(fake: &Arc<FakeTransport>) -> Arc<ImageResolutionService> {
    Arc::new(ImageResolutionService::new(
        ProxyFetcher::new(fake.clone()),
        ProxyBackend::codetabs(),
        Arc::new(ImageCache::new()),
        &FetchConfig::default(),
    ))
}

#[tokio::test]
async fn test_enqueue_skips_settled_and_duplicate_links() {
    let fake = Arc::new(FakeTransport::new());
    let service = service_over(&fake);

    let fresh = pending_article(1);
    assert!(service.enqueue(&fresh));
    assert!(!service.enqueue(&fresh));

    let mut settled = pending_article(2);
    settled.image_loading = false;
    assert!(!service.enqueue(&settled));

    let cached = pending_article(3);
    service.cache().insert(&cached.link, None);
    assert!(!service.enqueue(&cached));

    assert_eq!(service.pending(), 1);
}

#[tokio::test]
async fn test_queue_drains_in_batches_of_five() {
    init_tracing();
    let fake = Arc::new(FakeTransport::new());
    let backend = ProxyBackend::codetabs();
    let service = service_over(&fake);

    for n in 0..12 {
        let article = pending_article(n);
        fake.respond_after(
            backend.request_url(&article.link),
            page_with_og(&format!("https://cdn.test/{}.png", n)),
            Duration::from_millis(100),
        );
        assert!(service.enqueue(&article));
    }

    let started = Instant::now();
    let processed = service.process_queue().await;
    let elapsed = started.elapsed();

    assert_eq!(processed, 12);
    assert_eq!(fake.calls().len(), 12);
    assert_eq!(service.pending(), 0);
    assert!(!service.is_running());
    // Three sequential batches, each running its fetches concurrently.
    assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1100), "{:?}", elapsed);

    assert_eq!(
        service.lookup("https://news.test/story/7"),
        ImageLookup::Found("https://cdn.test/7.png".to_string())
    );
}

#[tokio::test]
async fn test_only_one_worker_drains_the_queue() {
    let fake = Arc::new(FakeTransport::new());
    let backend = ProxyBackend::codetabs();
    let service = service_over(&fake);

    for n in 0..6 {
        let article = pending_article(n);
        fake.respond_after(
            backend.request_url(&article.link),
            page_with_og("https://cdn.test/x.png"),
            Duration::from_millis(50),
        );
        service.enqueue(&article);
    }

    let (first, second) = tokio::join!(service.process_queue(), service.process_queue());

    assert_eq!(first + second, 6);
    assert_eq!(first.min(second), 0);
    assert_eq!(fake.calls().len(), 6);
}

#[tokio::test]
async fn test_failures_are_cached_as_missing() {
    let fake = Arc::new(FakeTransport::new());
    let backend = ProxyBackend::codetabs();
    let service = service_over(&fake);
    let mut events = service.subscribe();

    let broken = pending_article(1);
    let bare = pending_article(2);
    let relative = pending_article(3);
    fake.fail_status(backend.request_url(&broken.link), 500);
    fake.respond_via(&backend, &bare.link, "<html><body><p>No pictures</p></body></html>");
    fake.respond_via(
        &backend,
        &relative.link,
        r#"<html><body><article><img src="/images/hero.jpg"></article></body></html>"#,
    );
    for article in [&broken, &bare, &relative] {
        service.enqueue(article);
    }

    assert_eq!(service.process_queue().await, 3);

    assert_eq!(service.lookup(&broken.link), ImageLookup::Missing);
    assert_eq!(service.lookup(&bare.link), ImageLookup::Missing);
    assert_eq!(
        service.lookup(&relative.link),
        ImageLookup::Found("https://news.test/images/hero.jpg".to_string())
    );

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 3);
    assert!(received
        .iter()
        .any(|e| e.article_id == broken.id && e.image.is_none()));

    // Negative entries are never retried.
    assert!(!service.enqueue(&broken));
}

#[tokio::test]
async fn test_engine_patches_articles_as_images_arrive() {
    init_tracing();
    let fake = Arc::new(FakeTransport::new());
    let chain = default_feed_chain();
    let a = source("a", "ai");

    fake.respond_via(&chain[0], &a.feed_url, numbered_rss("a.test", 3, 3));
    fake.respond_via(&chain[0], "https://a.test/post/0", page_with_og("https://cdn.test/zero.png"));
    fake.respond_via(
        &chain[0],
        "https://a.test/post/1",
        r#"<html><head><meta name="twitter:image" content="/card.png"></head></html>"#,
    );
    // post/2 has no route and ends up negative.

    let engine = Arc::new(
        AggregationEngine::with_fetcher(
            ProxyFetcher::new(fake.clone()),
            chain,
            &FetchConfig::default(),
        )
        .unwrap(),
    );
    let _listener = engine.spawn_image_listener();

    let outcome = engine.refresh(std::slice::from_ref(&a)).await;
    assert!(outcome.articles.iter().all(|a| a.image_loading));

    let deadline = Instant::now() + Duration::from_secs(5);
    let snapshot = loop {
        let snapshot = engine.snapshot().await;
        if snapshot.articles.iter().all(|a| !a.image_loading) {
            break snapshot;
        }
        assert!(Instant::now() < deadline, "backfill did not settle");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    let image_of = |link: &str| {
        snapshot
            .articles
            .iter()
            .find(|a| a.link == link)
            .and_then(|a| a.image.clone())
    };
    assert_eq!(image_of("https://a.test/post/0").as_deref(), Some("https://cdn.test/zero.png"));
    assert_eq!(image_of("https://a.test/post/1").as_deref(), Some("https://a.test/card.png"));
    assert_eq!(image_of("https://a.test/post/2"), None);

    // A second refresh reads the cache and queues nothing.
    let before = fake.calls().len();
    let again = engine.refresh(std::slice::from_ref(&a)).await;
    assert!(again.articles.iter().all(|a| !a.image_loading));
    assert_eq!(
        again.articles.iter().find(|a| a.link == "https://a.test/post/0").and_then(|a| a.image.clone()).as_deref(),
        Some("https://cdn.test/zero.png")
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fake.calls().len(), before + 1);
    assert_eq!(engine.images().pending(), 0);
}

#[tokio::test]
async fn test_overlapping_refresh_picks_up_images_resolved_meanwhile() {
    init_tracing();
    let fake = Arc::new(FakeTransport::new());
    let chain = default_feed_chain();
    let a = source("a", "ai");
    let slow = source("slow", "cloud");

    fake.respond_via(&chain[0], &a.feed_url, numbered_rss("a.test", 1, 3));
    fake.respond_after(
        chain[0].request_url("https://a.test/post/0"),
        page_with_og("https://cdn.test/zero.png"),
        Duration::from_millis(150),
    );
    fake.respond_after(
        chain[0].request_url(&slow.feed_url),
        numbered_rss("slow.test", 1, 2),
        Duration::from_millis(400),
    );

    let engine = Arc::new(
        AggregationEngine::with_fetcher(
            ProxyFetcher::new(fake.clone()),
            chain,
            &FetchConfig::default(),
        )
        .unwrap(),
    );
    let _listener = engine.spawn_image_listener();

    let first = engine.refresh(std::slice::from_ref(&a)).await;
    assert!(first.committed);
    // Parses a.test/post/0 while its backfill is still in flight, and
    // commits only after the backfill has finished.
    let second = engine.refresh(&[a.clone(), slow.clone()]).await;
    assert!(second.committed);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let images = engine.images();
    let snapshot = engine.snapshot().await;
    for article in &snapshot.articles {
        assert!(
            !(article.image_loading && images.cache().contains(&article.link)),
            "{} still loading although its link is cached",
            article.link
        );
    }
    let post = snapshot
        .articles
        .iter()
        .find(|article| article.link == "https://a.test/post/0")
        .unwrap();
    assert!(!post.image_loading);
    assert_eq!(post.image.as_deref(), Some("https://cdn.test/zero.png"));
}
