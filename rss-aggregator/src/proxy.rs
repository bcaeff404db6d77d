//! Proxy relay descriptors and the ordered fallback combinator.
//!
//! Public CORS relays differ in two ways that matter to the pipeline: how the
//! response body is wrapped ([`Envelope`]) and what kind of payload sits
//! inside it ([`PayloadFormat`]). Both are carried as data on the backend so
//! the fallback order is a list, not nested control flow.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub const CODETABS: &str = "https://api.codetabs.com/v1/proxy?quest=";
pub const CORSPROXY: &str = "https://corsproxy.io/?";
pub const THINGPROXY: &str = "https://thingproxy.freeboard.io/fetch/";
pub const ALLORIGINS: &str = "https://api.allorigins.win/get?url=";
pub const RSS2JSON: &str = "https://api.rss2json.com/v1/api.json?rss_url=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Envelope {
    /// The body is the payload.
    Raw,
    /// The body is `{"contents": "<payload>"}`.
    JsonContents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadFormat {
    /// RSS 2.0, RSS 1.0 (RDF) or Atom XML.
    Xml,
    /// rss2json-style `{"status": "ok", "items": [...]}`.
    AggregatorJson,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyBackend {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_envelope")]
    pub envelope: Envelope,
    #[serde(default = "default_format")]
    pub format: PayloadFormat,
    /// Appended verbatim after the encoded target, e.g. `&count=8`.
    #[serde(default)]
    pub query_suffix: Option<String>,
    /// Overrides the caller's deadline for this backend only.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_envelope() -> Envelope {
    Envelope::Raw
}

fn default_format() -> PayloadFormat {
    PayloadFormat::Xml
}

impl ProxyBackend {
    pub fn raw(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            envelope: Envelope::Raw,
            format: PayloadFormat::Xml,
            query_suffix: None,
            timeout_ms: None,
        }
    }

    pub fn codetabs() -> Self {
        Self::raw("codetabs", CODETABS)
    }

    pub fn corsproxy() -> Self {
        Self::raw("corsproxy", CORSPROXY)
    }

    pub fn thingproxy() -> Self {
        Self::raw("thingproxy", THINGPROXY)
    }

    pub fn allorigins() -> Self {
        Self {
            envelope: Envelope::JsonContents,
            ..Self::raw("allorigins", ALLORIGINS)
        }
    }

    pub fn rss2json(count: usize) -> Self {
        Self {
            format: PayloadFormat::AggregatorJson,
            query_suffix: Some(format!("&count={}", count)),
            timeout_ms: Some(9_000),
            ..Self::raw("rss2json", RSS2JSON)
        }
    }

    /// Proxy base followed by the percent-encoded target.
    pub fn request_url(&self, target_url: &str) -> String {
        let mut url = format!("{}{}", self.base_url, urlencoding::encode(target_url));
        if let Some(suffix) = &self.query_suffix {
            url.push_str(suffix);
        }
        url
    }

    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

/// Primary relay plus two fallbacks, cheapest first.
pub fn default_feed_chain() -> Vec<ProxyBackend> {
    vec![
        ProxyBackend::codetabs(),
        ProxyBackend::corsproxy(),
        ProxyBackend::thingproxy(),
    ]
}

/// Single-backend chain for the aggregator-API pipeline.
pub fn aggregator_api_chain(count: usize) -> Vec<ProxyBackend> {
    vec![ProxyBackend::rss2json(count)]
}

/// Result of walking a fallback chain.
#[derive(Debug)]
pub enum Fallback<'a, S, T, E> {
    Succeeded {
        strategy: &'a S,
        value: T,
        /// Failures of the strategies tried before the winning one.
        failures: Vec<(&'a S, E)>,
    },
    Exhausted {
        failures: Vec<(&'a S, E)>,
    },
}

impl<'a, S, T, E> Fallback<'a, S, T, E> {
    pub fn failures(&self) -> &[(&'a S, E)] {
        match self {
            Fallback::Succeeded { failures, .. } | Fallback::Exhausted { failures } => failures,
        }
    }
}

/// Try each strategy once, in order, stopping at the first success.
pub async fn try_in_order<'a, S, T, E, F, Fut>(
    strategies: &'a [S],
    mut attempt: F,
) -> Fallback<'a, S, T, E>
where
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut failures = Vec::new();
    for strategy in strategies {
        match attempt(strategy).await {
            Ok(value) => {
                return Fallback::Succeeded {
                    strategy,
                    value,
                    failures,
                }
            }
            Err(e) => failures.push((strategy, e)),
        }
    }
    Fallback::Exhausted { failures }
}
