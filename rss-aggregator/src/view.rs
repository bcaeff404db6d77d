//! Filtered, capped and paginated view over a [`FeedSnapshot`].

use crate::aggregator::FeedSnapshot;
use crate::types::{Article, Category, Result, Source, ALL};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: usize = 24;
pub const DEFAULT_PER_SOURCE_CAP: usize = 6;
const TOP_SOURCES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub page_size: usize,
    /// `None` disables the per-source cap.
    pub per_source_cap: Option<usize>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            per_source_cap: Some(DEFAULT_PER_SOURCE_CAP),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    generation: u64,
    category: String,
    source: String,
}

#[derive(Debug)]
pub struct Page<'a> {
    pub articles: Vec<&'a Article>,
    pub total: usize,
    pub has_more: bool,
}

/// Dashboard selection state. Selecting a category or source resets paging.
#[derive(Debug)]
pub struct DashboardView {
    config: ViewConfig,
    category: String,
    source: String,
    visible: usize,
    seen_generation: Option<u64>,
    memo: Option<(MemoKey, Vec<usize>)>,
}

impl DashboardView {
    pub fn new(config: ViewConfig) -> Self {
        Self {
            config,
            category: ALL.to_string(),
            source: ALL.to_string(),
            visible: config.page_size,
            seen_generation: None,
            memo: None,
        }
    }

    pub fn active_category(&self) -> &str {
        &self.category
    }

    pub fn active_source(&self) -> &str {
        &self.source
    }

    pub fn visible_count(&self) -> usize {
        self.visible
    }

    /// Switching category clears any source selection.
    pub fn select_category(&mut self, category_id: &str) {
        self.category = category_id.to_string();
        self.source = ALL.to_string();
        self.reset_paging();
    }

    /// Selecting the active source again toggles back to everything;
    /// otherwise the category follows the source.
    pub fn select_source(&mut self, source_id: &str, category_id: &str) {
        if self.source == source_id {
            self.source = ALL.to_string();
            self.category = ALL.to_string();
        } else {
            self.source = source_id.to_string();
            self.category = category_id.to_string();
        }
        self.reset_paging();
    }

    pub fn show_more(&mut self) {
        self.visible += self.config.page_size;
    }

    pub fn reset_paging(&mut self) {
        self.visible = self.config.page_size;
    }

    /// Category filter, then source filter, then the per-source cap.
    /// Memoized per (generation, category, source). The first look at a
    /// newer generation resets paging.
    pub fn filtered<'a>(&mut self, snapshot: &'a FeedSnapshot) -> Vec<&'a Article> {
        if self.seen_generation.is_some_and(|seen| seen != snapshot.generation) {
            self.reset_paging();
        }
        self.seen_generation = Some(snapshot.generation);

        let key = MemoKey {
            generation: snapshot.generation,
            category: self.category.clone(),
            source: self.source.clone(),
        };

        let stale = !matches!(&self.memo, Some((cached, _)) if *cached == key);
        if stale {
            let indices = filter_indices(
                &snapshot.articles,
                &self.category,
                &self.source,
                self.config.per_source_cap,
            );
            self.memo = Some((key, indices));
        }

        match &self.memo {
            Some((_, indices)) => indices
                .iter()
                .filter_map(|&idx| snapshot.articles.get(idx))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn page<'a>(&mut self, snapshot: &'a FeedSnapshot) -> Page<'a> {
        let filtered = self.filtered(snapshot);
        let total = filtered.len();
        let articles = filtered.into_iter().take(self.visible).collect();
        Page {
            articles,
            total,
            has_more: self.visible < total,
        }
    }
}

fn filter_indices(
    articles: &[Article],
    category: &str,
    source: &str,
    per_source_cap: Option<usize>,
) -> Vec<usize> {
    let mut per_source: HashMap<&str, usize> = HashMap::new();

    articles
        .iter()
        .enumerate()
        .filter(|&(_, a)| category == ALL || a.category_id == category)
        .filter(|&(_, a)| source == ALL || a.source_id == source)
        .filter(|&(_, a)| {
            let seen = per_source.entry(a.source_id.as_str()).or_insert(0);
            *seen += 1;
            per_source_cap.map_or(true, |cap| *seen <= cap)
        })
        .map(|(idx, _)| idx)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source_id: String,
    pub label: String,
    pub count: usize,
}

/// Headline numbers shown next to the article list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    /// Per category id; `all` holds the grand total.
    pub category_counts: Vec<(String, usize)>,
    /// Busiest sources first, at most twelve, zero counts omitted.
    pub top_sources: Vec<SourceCount>,
    pub published_last_24h: usize,
}

impl DashboardStats {
    pub fn compute(
        snapshot: &FeedSnapshot,
        categories: &[Category],
        sources: &[Source],
        now: DateTime<Utc>,
    ) -> Self {
        let articles = &snapshot.articles;

        let category_counts = categories
            .iter()
            .map(|c| {
                let count = if c.id == ALL {
                    articles.len()
                } else {
                    articles.iter().filter(|a| a.category_id == c.id).count()
                };
                (c.id.clone(), count)
            })
            .collect();

        let mut top_sources: Vec<SourceCount> = sources
            .iter()
            .map(|s| SourceCount {
                source_id: s.id.clone(),
                label: s.label.clone(),
                count: articles.iter().filter(|a| a.source_id == s.id).count(),
            })
            .filter(|s| s.count > 0)
            .collect();
        top_sources.sort_by(|a, b| b.count.cmp(&a.count));
        top_sources.truncate(TOP_SOURCES);

        // Future-dated entries count as recent.
        let cutoff = now - Duration::hours(24);
        let published_last_24h = articles
            .iter()
            .filter(|a| a.published_at.is_some_and(|t| t > cutoff))
            .count();

        Self {
            category_counts,
            top_sources,
            published_last_24h,
        }
    }
}

/// The current page plus failures and stats, as printed by `--json`.
pub fn render_json(
    view: &DashboardView,
    page: &Page<'_>,
    snapshot: &FeedSnapshot,
    stats: &DashboardStats,
) -> Result<String> {
    let output = serde_json::json!({
        "generation": snapshot.generation,
        "category": view.active_category(),
        "source": view.active_source(),
        "total": page.total,
        "has_more": page.has_more,
        "articles": page.articles,
        "failed_sources": snapshot.failed_labels(),
        "stats": stats,
    });
    Ok(serde_json::to_string_pretty(&output)?)
}
