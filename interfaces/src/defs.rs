use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Selection id meaning "no filter" for both categories and sources.
pub const ALL: &str = "all";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(rename = "category")]
    pub category_id: String,
    pub label: String,
    #[serde(default)]
    pub short_label: String,
    #[serde(rename = "url")]
    pub feed_url: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub image: Option<String>,
    pub image_loading: bool,
    pub published_raw: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_id: String,
    pub category_id: String,
}

impl Article {
    pub fn identity(link: &str, source_id: &str) -> String {
        format!("{}|{}", link, source_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_id: String,
    pub source_label: String,
}

impl FailureRecord {
    pub fn for_source(source: &Source) -> Self {
        Self {
            source_id: source.id.clone(),
            source_label: source.label.clone(),
        }
    }
}

/// Emitted once per backfilled link. `image == None` means the page was
/// checked and nothing usable was found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResolved {
    pub article_id: String,
    pub link: String,
    pub image: Option<String>,
}

// Object style note:
// Sources and categories are static configuration; nothing in the pipeline
// mutates them after load. Articles are rebuilt on every refresh and only
// their `image`/`image_loading` fields change afterwards.
