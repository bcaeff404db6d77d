use crate::proxy::{aggregator_api_chain, default_feed_chain, ProxyBackend};
use crate::types::{AggregatorError, Category, FetchConfig, Result, Source, ALL};
use crate::view::ViewConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

pub const CONFIG_ENV: &str = "TECHHUB_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    /// Raw XML through the relay chain, parsed locally.
    #[default]
    Xml,
    /// Pre-parsed JSON from the feed-to-JSON service.
    AggregatorApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: PipelineMode,
    /// Replaces the built-in relay chain when non-empty.
    pub proxies: Vec<ProxyBackend>,
    pub fetch: FetchConfig,
    pub view: ViewConfig,
    pub categories: Vec<Category>,
    pub sources: Vec<Source>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let (categories, sources) = default_catalog();
        Self {
            mode: PipelineMode::default(),
            proxies: Vec::new(),
            fetch: FetchConfig::default(),
            view: ViewConfig::default(),
            categories,
            sources,
        }
    }
}

impl AppConfig {
    /// Load from `path`, else from `$TECHHUB_CONFIG`, else the built-in
    /// catalog. An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var(CONFIG_ENV).ok().map(PathBuf::from),
        };

        let config = match path {
            Some(p) => {
                info!("Loading configuration from {}", p.display());
                let content = fs::read_to_string(&p)?;
                Self::from_toml(&content)?
            }
            None => {
                info!("No configuration file given, using built-in catalog");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Omitted `categories` or `sources` fall back to the built-in catalog.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(content)
            .map_err(|e| AggregatorError::Config(format!("Invalid configuration: {}", e)))?;
        if config.view.per_source_cap == Some(0) {
            config.view.per_source_cap = None;
        }
        if config.view.page_size == 0 {
            return Err(AggregatorError::Config("view.page_size must be positive".to_string()));
        }
        Ok(config)
    }

    /// Unparseable feed URLs and duplicate source ids are fatal. Sources
    /// pointing at an unknown category are kept; they only show up under
    /// `all`.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for source in &self.sources {
            Url::parse(&source.feed_url)?;
            if !ids.insert(source.id.as_str()) {
                return Err(AggregatorError::Config(format!(
                    "Duplicate source id: {}",
                    source.id
                )));
            }
        }

        let known: HashSet<&str> = self.categories.iter().map(|c| c.id.as_str()).collect();
        for source in &self.sources {
            if source.category_id == ALL || !known.contains(source.category_id.as_str()) {
                warn!(
                    "Source {} references unknown category {}",
                    source.id, source.category_id
                );
            }
        }

        if self.sources.is_empty() {
            warn!("No sources configured");
        }
        Ok(())
    }

    pub fn proxy_chain(&self) -> Vec<ProxyBackend> {
        if !self.proxies.is_empty() {
            return self.proxies.clone();
        }
        match self.mode {
            PipelineMode::Xml => default_feed_chain(),
            PipelineMode::AggregatorApi => aggregator_api_chain(self.fetch.max_entries_per_feed),
        }
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }
}

// id, label, icon, color
const CATEGORIES: &[(&str, &str, &str, &str)] = &[
    ("all", "All News", "📰", "#0d0d0d"),
    ("ai", "AI & LLMs", "🤖", "#10a37f"),
    ("microsoft", "Microsoft", "⊞", "#0078d4"),
    ("cloud", "Cloud", "☁", "#ff9900"),
    ("devops", "DevOps", "⚙", "#ff6b35"),
    ("enterprise", "Enterprise", "🏢", "#607d8b"),
    ("security", "Security", "🔐", "#cc0000"),
];

struct SourceRow {
    id: &'static str,
    category: &'static str,
    label: &'static str,
    short: &'static str,
    url: &'static str,
    color: &'static str,
    background: &'static str,
    domain: &'static str,
}

macro_rules! source_rows {
    ($(($id:expr, $cat:expr, $label:expr, $short:expr, $url:expr, $color:expr, $bg:expr, $domain:expr)),* $(,)?) => {
        &[$(SourceRow {
            id: $id,
            category: $cat,
            label: $label,
            short: $short,
            url: $url,
            color: $color,
            background: $bg,
            domain: $domain,
        }),*]
    };
}

const SOURCES: &[SourceRow] = source_rows![
    ("openai", "ai", "OpenAI", "OAI", "https://openai.com/blog/rss.xml", "#10a37f", "#e8f7f3", "openai.com"),
    ("anthropic", "ai", "Anthropic", "AC", "https://hnrss.org/newest?q=Anthropic", "#b05c2a", "#f7ede5", "anthropic.com"),
    ("vergeai", "ai", "The Verge AI", "VG", "https://www.theverge.com/rss/index.xml", "#e5192b", "#fdeaeb", "theverge.com"),
    ("tcai", "ai", "TechCrunch AI", "TC", "https://techcrunch.com/category/artificial-intelligence/feed/", "#0a8f08", "#e7f4e7", "techcrunch.com"),
    ("msai", "microsoft", "Microsoft AI", "MS", "https://blogs.microsoft.com/ai/feed/", "#0078d4", "#e5f2fc", "microsoft.com"),
    ("azure", "microsoft", "Azure", "AZ", "https://azure.microsoft.com/en-us/blog/feed/", "#0089d6", "#e5f2fc", "azure.microsoft.com"),
    ("github", "microsoft", "GitHub", "GH", "https://github.blog/all.atom", "#24292f", "#f0f0f0", "github.com"),
    ("m365", "microsoft", "M365 / Copilot", "M3", "https://www.microsoft.com/en-us/microsoft-365/blog/feed/", "#5c2d91", "#f0eaf8", "microsoft.com"),
    ("aws", "cloud", "AWS", "AWS", "https://aws.amazon.com/blogs/aws/feed/", "#ff9900", "#fff5e5", "aws.amazon.com"),
    ("gcloud", "cloud", "Google Cloud", "GC", "https://feeds.feedburner.com/GoogleCloudPlatformBlog", "#4285f4", "#eaf1ff", "cloud.google.com"),
    ("awssec", "cloud", "AWS Security", "AWSs", "https://aws.amazon.com/blogs/security/feed/", "#e8691c", "#fff0e8", "aws.amazon.com"),
    ("devopsdotcom", "devops", "DevOps.com", "DO", "https://devops.com/feed/", "#ff6b35", "#fff0ea", "devops.com"),
    ("thenewstack", "devops", "The New Stack", "NS", "https://thenewstack.io/feed/", "#1a1a2e", "#eaeaf3", "thenewstack.io"),
    ("docker", "devops", "Docker", "DK", "https://www.docker.com/blog/feed/", "#2496ed", "#e8f3fc", "docker.com"),
    ("redhat", "devops", "Red Hat", "RH", "https://www.redhat.com/en/rss/blog", "#cc0000", "#fdeaea", "redhat.com"),
    ("cisco", "enterprise", "Cisco", "CS", "https://blogs.cisco.com/feed", "#049fd9", "#e5f6fd", "cisco.com"),
    ("adobe", "enterprise", "Adobe", "AD", "https://blog.adobe.com/en/publish/feed.xml", "#fa0f00", "#fde8e8", "adobe.com"),
    ("hpe", "enterprise", "HPE", "HP", "https://hnrss.org/newest?q=Hewlett+Packard+Enterprise", "#01a982", "#e5f7f3", "hpe.com"),
    ("veeam", "enterprise", "Veeam", "VM", "https://www.veeam.com/blog/feed/", "#007db8", "#e5f2f9", "veeam.com"),
    ("paloalto", "security", "Palo Alto", "PA", "https://www.paloaltonetworks.com/blog/feed/", "#fa582d", "#fff0eb", "paloaltonetworks.com"),
    ("fortinet", "security", "Fortinet", "FT", "https://www.fortinet.com/blog/rss.xml", "#ee3124", "#fdecea", "fortinet.com"),
    ("krebs", "security", "Krebs on Security", "KB", "https://krebsonsecurity.com/feed/", "#333", "#f0f0f0", "krebsonsecurity.com"),
];

/// Built-in categories (including `all`) and sources.
pub fn default_catalog() -> (Vec<Category>, Vec<Source>) {
    let categories = CATEGORIES
        .iter()
        .map(|&(id, label, icon, color)| Category {
            id: id.to_string(),
            label: label.to_string(),
            icon: icon.to_string(),
            color: color.to_string(),
        })
        .collect();

    let sources = SOURCES
        .iter()
        .map(|row| Source {
            id: row.id.to_string(),
            category_id: row.category.to_string(),
            label: row.label.to_string(),
            short_label: row.short.to_string(),
            feed_url: row.url.to_string(),
            color: row.color.to_string(),
            background: row.background.to_string(),
            domain: Some(row.domain.to_string()),
        })
        .collect();

    (categories, sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::PayloadFormat;

    #[test]
    fn built_in_catalog_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.sources.len(), 22);
        assert_eq!(config.categories.len(), 7);
        assert!(config.validate().is_ok());
        assert_eq!(config.proxy_chain().len(), 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
mode = "aggregator-api"

[view]
per_source_cap = 0

[[sources]]
id = "example"
category = "ai"
label = "Example"
url = "https://example.com/feed.xml"
"#,
        )
        .unwrap();

        assert_eq!(config.mode, PipelineMode::AggregatorApi);
        assert_eq!(config.view.per_source_cap, None);
        assert_eq!(config.view.page_size, 24);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.categories.len(), 7);
        assert_eq!(config.fetch.max_entries_per_feed, 8);

        let chain = config.proxy_chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].format, PayloadFormat::AggregatorJson);
    }

    #[test]
    fn duplicate_source_ids_are_rejected() {
        let mut config = AppConfig::default();
        let dup = config.sources[0].clone();
        config.sources.push(dup);
        assert!(matches!(config.validate(), Err(AggregatorError::Config(_))));
    }

    #[test]
    fn malformed_feed_urls_are_rejected() {
        let mut config = AppConfig::default();
        config.sources[3].feed_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(AggregatorError::InvalidUrl(_))));
    }

    #[test]
    fn unknown_category_is_only_a_warning() {
        let mut config = AppConfig::default();
        config.sources[0].category_id = "gaming".to_string();
        assert!(config.validate().is_ok());
    }
}
