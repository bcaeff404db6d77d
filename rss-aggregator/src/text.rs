/// Text normalization helpers shared by the feed parser and the image scraper.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));
static ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"&[^;\s]+;").expect("entity regex"));
static IMG_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("img regex")
});

/// Decode the handful of entities that survive into feed titles.
///
/// Deliberately not a general HTML entity decoder.
pub fn decode_title(title: &str) -> String {
    title
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#8217;", "'")
        .replace("&#8220;", "\"")
        .replace("&#8221;", "\"")
}

/// Drop tags, blank out entities and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let without_tags = TAG_RE.replace_all(html, "");
    let without_entities = ENTITY_RE.replace_all(&without_tags, " ");
    without_entities.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut to at most `max_chars` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// `src` of the first `<img>` found in an HTML fragment.
pub fn first_img_src(html: &str) -> Option<String> {
    IMG_SRC_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|src| !src.is_empty())
}

/// Parse the date formats seen in RSS, Atom and aggregator payloads.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Zone names chrono's RFC 2822 parser rejects, e.g. "... 10:00:00 EST".
    if let Some(dt) = parse_rfc2822_named_zone(raw) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

fn parse_rfc2822_named_zone(raw: &str) -> Option<DateTime<Utc>> {
    let (head, zone) = raw.rsplit_once(' ')?;
    let offset = match zone {
        "EST" => "-0500",
        "EDT" => "-0400",
        "CST" => "-0600",
        "CDT" => "-0500",
        "MST" => "-0700",
        "MDT" => "-0600",
        "PST" => "-0800",
        "PDT" => "-0700",
        "Z" | "UTC" => "+0000",
        _ => return None,
    };
    DateTime::parse_from_rfc2822(&format!("{} {}", head, offset))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Absolute form of an image reference found on `page_url`.
pub fn resolve_image_url(page_url: &str, src: &str) -> String {
    let src = src.trim();
    if Url::parse(src).is_ok() {
        return src.to_string();
    }
    Url::parse(page_url)
        .and_then(|base| base.join(src))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| src.to_string())
}
