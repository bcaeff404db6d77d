use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use techhub_aggregator::view::render_json;
use techhub_aggregator::{
    AggregationEngine, AppConfig, DashboardStats, DashboardView, ProxyFetcher, ALL,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "techhub", about = "Aggregate tech news feeds into one dashboard")]
struct Cli {
    /// TOML file with sources, categories and fetch settings
    #[arg(long, env = "TECHHUB_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value = ALL)]
    category: String,

    /// Source id; implies that source's category
    #[arg(long)]
    source: Option<String>,

    /// Number of pages to show
    #[arg(long, default_value_t = 1)]
    pages: usize,

    /// Wait up to this many seconds for image backfill before printing
    #[arg(long)]
    wait_images: Option<u64>,

    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    info!(
        "Starting TechHub aggregator: {} sources, {:?} pipeline",
        config.sources.len(),
        config.mode
    );

    let fetcher = ProxyFetcher::http(&config.fetch).context("Failed to build HTTP client")?;
    let engine = Arc::new(AggregationEngine::with_fetcher(
        fetcher,
        config.proxy_chain(),
        &config.fetch,
    )?);
    let listener = engine.spawn_image_listener();

    let mut view = DashboardView::new(config.view);
    match &cli.source {
        Some(id) => {
            let Some(source) = config.source(id) else {
                bail!("Unknown source: {}", id);
            };
            view.select_source(&source.id, &source.category_id);
        }
        None => view.select_category(&cli.category),
    }
    for _ in 1..cli.pages {
        view.show_more();
    }

    let started = Instant::now();
    let outcome = engine.refresh(&config.sources).await;
    info!(
        "Fetched {} articles in {}ms",
        outcome.articles.len(),
        started.elapsed().as_millis()
    );

    if let Some(secs) = cli.wait_images {
        wait_for_backfill(&engine, Duration::from_secs(secs)).await;
    }

    let snapshot = engine.snapshot().await;
    if !snapshot.failures.is_empty() {
        warn!(
            "Could not load {} source(s): {}",
            snapshot.failures.len(),
            snapshot.failed_labels().join(", ")
        );
    }

    let page = view.page(&snapshot);
    if cli.json {
        let stats = DashboardStats::compute(&snapshot, &config.categories, &config.sources, Utc::now());
        println!("{}", render_json(&view, &page, &snapshot, &stats)?);
    } else {
        for article in &page.articles {
            let when = article
                .published_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "----------------".to_string());
            let image = match (&article.image, article.image_loading) {
                (Some(_), _) => "img",
                (None, true) => "...",
                (None, false) => "   ",
            };
            println!("{}  {:<14} {}  {}", when, article.source_id, image, article.title);
            println!("{:>36}{}", "", article.link);
        }
        println!(
            "Showing {} of {} articles{}",
            page.articles.len(),
            page.total,
            if page.has_more { " (more available)" } else { "" }
        );
    }

    listener.abort();
    Ok(())
}

async fn wait_for_backfill(engine: &AggregationEngine, limit: Duration) {
    let images = engine.images();
    let deadline = Instant::now() + limit;

    while images.is_running() || images.pending() > 0 {
        if Instant::now() >= deadline {
            warn!("Image backfill still running after {:?}, {} pending", limit, images.pending());
            return;
        }
        tokio::time::sleep(IDLE_POLL).await;
    }
    // Let the listener apply the last batch of events.
    tokio::time::sleep(IDLE_POLL).await;
    info!("Image backfill finished, {} links cached", images.cache().len());
}
