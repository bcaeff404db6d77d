use crate::images::ImageCache;
use crate::proxy::PayloadFormat;
use crate::text::{decode_title, first_img_src, parse_published, strip_html, truncate_chars};
use crate::types::{AggregatorError, Article, FetchConfig, Result, Source};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Normalizes feed payloads into [`Article`]s.
///
/// XML payloads consult the shared [`ImageCache`] for entries whose markup
/// carries no image; aggregator JSON payloads never do.
pub struct FeedParser {
    max_entries: usize,
    description_max_chars: usize,
    image_cache: Arc<ImageCache>,
}

impl FeedParser {
    pub fn new(config: &FetchConfig, image_cache: Arc<ImageCache>) -> Self {
        Self {
            max_entries: config.max_entries_per_feed,
            description_max_chars: config.description_max_chars,
            image_cache,
        }
    }

    pub fn parse(&self, payload: &str, format: PayloadFormat, source: &Source) -> Result<Vec<Article>> {
        let articles = match format {
            PayloadFormat::Xml => self.parse_xml(payload, source)?,
            PayloadFormat::AggregatorJson => self.parse_aggregator_json(payload, source)?,
        };
        debug!(
            "Parsed {} articles for {} ({} bytes)",
            articles.len(),
            source.id,
            payload.len()
        );
        Ok(articles)
    }

    pub fn parse_xml(&self, xml: &str, source: &Source) -> Result<Vec<Article>> {
        let (entries, saw_feed_root) = scan_entries(xml, self.max_entries)?;

        if entries.is_empty() && !saw_feed_root {
            return Err(AggregatorError::Parse(
                "Payload is neither RSS nor Atom".to_string(),
            ));
        }

        Ok(entries
            .into_iter()
            .filter_map(|entry| self.xml_entry_to_article(entry, source))
            .collect())
    }

    fn xml_entry_to_article(&self, entry: RawEntry, source: &Source) -> Option<Article> {
        let title = decode_title(entry.title.as_deref().unwrap_or_default().trim());
        let link = entry.best_link();
        if title.is_empty() || link.is_empty() {
            return None;
        }

        let description_html = first_non_empty([&entry.description, &entry.summary, &entry.content]);
        let published_raw =
            first_non_empty([&entry.pub_date, &entry.published, &entry.updated, &entry.dc_date]);

        let mut image = entry
            .media_content
            .or(entry.enclosure)
            .or(entry.itunes_image)
            .or(entry.media_thumbnail)
            .or_else(|| first_img_src(&description_html));

        let cached = self.image_cache.get(&link);
        if image.is_none() {
            if let Some(hit) = &cached {
                image = hit.clone();
            }
        }
        let image_loading = image.is_none() && cached.is_none();

        Some(Article {
            id: Article::identity(&link, &source.id),
            title,
            description: truncate_chars(&strip_html(&description_html), self.description_max_chars),
            published_at: parse_published(&published_raw),
            published_raw,
            link,
            image,
            image_loading,
            source_id: source.id.clone(),
            category_id: source.category_id.clone(),
        })
    }

    pub fn parse_aggregator_json(&self, json: &str, source: &Source) -> Result<Vec<Article>> {
        let feed: AggregatorFeed = serde_json::from_str(json)
            .map_err(|e| AggregatorError::Parse(format!("Invalid aggregator payload: {}", e)))?;

        if feed.status != "ok" {
            return Err(AggregatorError::Parse(format!(
                "Aggregator returned status {:?}: {}",
                feed.status,
                feed.message.unwrap_or_default()
            )));
        }

        Ok(feed
            .items
            .into_iter()
            .take(self.max_entries)
            .filter_map(|item| {
                let title = item.title.unwrap_or_default().trim().to_string();
                let link = item.link.unwrap_or_default().trim().to_string();
                if title.is_empty() || link.is_empty() {
                    return None;
                }

                let description_html = first_non_empty([&item.description, &item.content]);
                let published_raw = item.pub_date.unwrap_or_default();
                let image = item
                    .enclosure
                    .as_ref()
                    .and_then(|enclosure| enclosure.get("link"))
                    .and_then(|link| link.as_str())
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .or_else(|| {
                        item.thumbnail
                            .as_deref()
                            .map(str::trim)
                            .filter(|url| !url.is_empty())
                            .map(str::to_string)
                    });

                Some(Article {
                    id: Article::identity(&link, &source.id),
                    title,
                    description: truncate_chars(
                        &strip_html(&description_html),
                        self.description_max_chars,
                    ),
                    published_at: parse_published(&published_raw),
                    published_raw,
                    link,
                    image,
                    image_loading: false,
                    source_id: source.id.clone(),
                    category_id: source.category_id.clone(),
                })
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct AggregatorFeed {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    items: Vec<AggregatorItem>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AggregatorItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    content: Option<String>,
    // `{}` or `[]` when the item has no enclosure
    enclosure: Option<serde_json::Value>,
    thumbnail: Option<String>,
}

fn first_non_empty<const N: usize>(candidates: [&Option<String>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Title,
    Link,
    Description,
    Summary,
    Content,
    PubDate,
    Published,
    Updated,
    DcDate,
}

impl TextField {
    fn from_name(qname: &[u8]) -> Option<Self> {
        match qname {
            b"title" => Some(TextField::Title),
            b"link" => Some(TextField::Link),
            b"description" => Some(TextField::Description),
            b"summary" => Some(TextField::Summary),
            b"content" => Some(TextField::Content),
            b"pubDate" => Some(TextField::PubDate),
            b"published" => Some(TextField::Published),
            b"updated" => Some(TextField::Updated),
            b"dc:date" => Some(TextField::DcDate),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RawEntry {
    title: Option<String>,
    link_text: Option<String>,
    /// `(rel, href)` for every `<link>` carrying an href, in document order.
    link_hrefs: Vec<(Option<String>, String)>,
    description: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    pub_date: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    dc_date: Option<String>,
    media_content: Option<String>,
    enclosure: Option<String>,
    itunes_image: Option<String>,
    media_thumbnail: Option<String>,
}

impl RawEntry {
    fn slot(&mut self, field: TextField) -> &mut Option<String> {
        match field {
            TextField::Title => &mut self.title,
            TextField::Link => &mut self.link_text,
            TextField::Description => &mut self.description,
            TextField::Summary => &mut self.summary,
            TextField::Content => &mut self.content,
            TextField::PubDate => &mut self.pub_date,
            TextField::Published => &mut self.published,
            TextField::Updated => &mut self.updated,
            TextField::DcDate => &mut self.dc_date,
        }
    }

    /// Only the first element of each kind counts, even if it is empty.
    fn wants(&mut self, field: TextField) -> bool {
        self.slot(field).is_none()
    }

    fn set_text(&mut self, field: TextField, text: &str) {
        let slot = self.slot(field);
        if slot.is_none() {
            *slot = Some(text.trim().to_string());
        }
    }

    fn read_attributes(&mut self, e: &BytesStart) {
        match e.name().as_ref() {
            b"link" => {
                if let Some(href) = attribute(e, b"href") {
                    self.link_hrefs.push((attribute(e, b"rel"), href));
                }
            }
            b"media:content" if self.media_content.is_none() && is_image_typed(e) => {
                self.media_content = attribute(e, b"url");
            }
            b"enclosure" if self.enclosure.is_none() && is_image_typed(e) => {
                self.enclosure = attribute(e, b"url");
            }
            b"itunes:image" if self.itunes_image.is_none() => {
                self.itunes_image = attribute(e, b"href");
            }
            b"media:thumbnail" if self.media_thumbnail.is_none() => {
                self.media_thumbnail = attribute(e, b"url");
            }
            _ => {}
        }
    }

    /// Atom alternate (or rel-less) href first, then any href, then RSS text.
    fn best_link(&self) -> String {
        self.link_hrefs
            .iter()
            .find(|(rel, _)| matches!(rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.link_hrefs.first())
            .map(|(_, href)| href.trim().to_string())
            .or_else(|| self.link_text.as_ref().map(|t| t.trim().to_string()))
            .unwrap_or_default()
    }
}

fn attribute(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        })
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Media elements without a `type` are assumed to be images.
fn is_image_typed(e: &BytesStart) -> bool {
    match attribute(e, b"type") {
        Some(mime) => mime.starts_with("image/"),
        None => attribute(e, b"medium").map_or(true, |medium| medium == "image"),
    }
}

fn local_name(qname: &[u8]) -> &[u8] {
    match qname.iter().rposition(|b| *b == b':') {
        Some(idx) => &qname[idx + 1..],
        None => qname,
    }
}

fn resolve_reference(name: &str) -> String {
    let resolved = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => name
            .strip_prefix("#x")
            .or_else(|| name.strip_prefix("#X"))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .or_else(|| name.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok()))
            .and_then(char::from_u32),
    };
    match resolved {
        Some(c) => c.to_string(),
        // Undeclared HTML entities (e.g. `&nbsp;`) are kept verbatim.
        None => format!("&{};", name),
    }
}

struct Capture {
    field: TextField,
    nested: usize,
    text: String,
}

/// Walk the document and collect the first `max_entries` items/entries.
///
/// Returns the raw entries plus whether an `rss`, `feed` or `RDF` root was
/// seen at all.
fn scan_entries(xml: &str, max_entries: usize) -> Result<(Vec<RawEntry>, bool)> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<RawEntry> = None;
    let mut capture: Option<Capture> = None;
    let mut saw_feed_root = false;
    let mut depth = 0usize;
    let mut entry_depth = 0usize;

    loop {
        if entries.len() >= max_entries {
            break;
        }

        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if let Some(cap) = capture.as_mut() {
                    cap.nested += 1;
                    continue;
                }

                let qname = e.name();
                let qname = qname.as_ref();
                match current.as_mut() {
                    None => {
                        if matches!(local_name(qname), b"rss" | b"feed" | b"RDF") {
                            saw_feed_root = true;
                        }
                        if matches!(qname, b"item" | b"entry") {
                            current = Some(RawEntry::default());
                            entry_depth = depth;
                        }
                    }
                    Some(entry) => {
                        entry.read_attributes(&e);
                        if let Some(field) = TextField::from_name(qname) {
                            if entry.wants(field) {
                                capture = Some(Capture {
                                    field,
                                    nested: 0,
                                    text: String::new(),
                                });
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if capture.is_some() {
                    continue;
                }
                if let Some(entry) = current.as_mut() {
                    entry.read_attributes(&e);
                    if let Some(field) = TextField::from_name(e.name().as_ref()) {
                        entry.set_text(field, "");
                    }
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if let Some(cap) = capture.as_mut() {
                    if cap.nested > 0 {
                        cap.nested -= 1;
                        continue;
                    }
                    if let (Some(cap), Some(entry)) = (capture.take(), current.as_mut()) {
                        entry.set_text(cap.field, &cap.text);
                    }
                    continue;
                }
                if depth + 1 == entry_depth {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(cap) = capture.as_mut() {
                    cap.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(cap) = capture.as_mut() {
                    cap.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let Some(cap) = capture.as_mut() {
                    cap.text.push_str(&resolve_reference(&String::from_utf8_lossy(&r)));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AggregatorError::Parse(format!(
                    "Malformed XML at position {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    Ok((entries, saw_feed_root))
}
