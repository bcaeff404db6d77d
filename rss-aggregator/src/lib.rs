pub mod types;
pub mod traits;
pub mod config;
pub mod proxy;
pub mod fetcher;
pub mod text;
pub mod parser;
pub mod images;
pub mod ingestor;
pub mod aggregator;
pub mod view;

pub use types::*;
pub use traits::Transport;
pub use config::{AppConfig, PipelineMode};
pub use proxy::{try_in_order, Fallback, ProxyBackend};
pub use fetcher::{HttpTransport, ProxyFetcher};
pub use parser::FeedParser;
pub use images::{ImageCache, ImageLookup, ImageResolutionService};
pub use ingestor::{IngestReport, IngestStatus, SourceIngestor};
pub use aggregator::{AggregationEngine, FeedSnapshot, RefreshOutcome};
pub use view::{DashboardStats, DashboardView, Page, ViewConfig};
