//! Listing-page scraping: a news page whose stories are linked headings.
//!
//! Each `<h1>`..`<h6>` wrapping an `<a href>` becomes one entry. Within the
//! markup up to the next heading, a `<p>` or `<time>` whose attributes
//! mention `date` supplies the published date and the first other `<p>`
//! supplies the summary.

use std::sync::LazyLock;

use async_trait::async_trait;
use ednews_core::Entry;
use regex::Regex;
use reqwest::Url;

use crate::error::FeedError;
use crate::processor::{fetch_text, FetchContext, Preprocessor};

static HEADING_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<h[1-6][^>]*>\s*<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid regex")
});

static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(p|time)(\s[^>]*)?>(.*?)</(?:p|time)>").expect("valid regex")
});

static DATETIME_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)datetime\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip tags, decode the common entities, and collapse whitespace.
pub(crate) fn clean_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#8217;", "\u{2019}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    SPACE_RE.replace_all(&decoded, " ").trim().to_owned()
}

fn resolve_link(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match base {
        Some(base) => base.join(href).ok().map(String::from),
        None => Url::parse(href).ok().map(String::from),
    }
}

/// Extract headline entries from a listing page, in page order.
///
/// Relative links are resolved against `page_url`. Headings whose link text
/// is empty are skipped.
#[must_use]
pub fn parse_listing(html: &str, page_url: &str) -> Vec<Entry> {
    let base = Url::parse(page_url).ok();
    let headings: Vec<_> = HEADING_LINK_RE.captures_iter(html).collect();

    let mut entries = Vec::with_capacity(headings.len());
    for (i, caps) in headings.iter().enumerate() {
        let title = clean_text(&caps[2]);
        let Some(link) = resolve_link(&caps[1], base.as_ref()) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }

        let start = caps.get(0).map_or(0, |m| m.end());
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(html.len(), |m| m.start());
        let segment = &html[start..end];

        let mut published = None;
        let mut summary = None;
        for p in PARAGRAPH_RE.captures_iter(segment) {
            let attrs = p.get(2).map_or("", |m| m.as_str());
            let is_date = p[1].eq_ignore_ascii_case("time") || attrs.to_lowercase().contains("date");
            if is_date {
                if published.is_none() {
                    published = DATETIME_ATTR_RE
                        .captures(attrs)
                        .map(|d| d[1].trim().to_owned())
                        .or_else(|| Some(clean_text(&p[3])))
                        .filter(|d| !d.is_empty());
                }
            } else if summary.is_none() {
                summary = Some(clean_text(&p[3])).filter(|s| !s.is_empty());
            }
        }

        entries.push(Entry {
            guid: Some(link.clone()),
            title: Some(title),
            link: Some(link),
            summary,
            published,
            ..Entry::default()
        });
    }
    entries
}

/// Preprocessor for HTML listing pages. Sources without a `feed` URL may use
/// their `link` with this processor.
#[derive(Debug, Clone)]
pub struct HtmlListPreprocessor {
    name: String,
}

impl HtmlListPreprocessor {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl Default for HtmlListPreprocessor {
    fn default() -> Self {
        Self::new("html-list")
    }
}

#[async_trait]
impl Preprocessor for HtmlListPreprocessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_page_url(&self) -> bool {
        true
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<Entry>, FeedError> {
        let html = fetch_text(&ctx.client, &ctx.url).await?;
        let entries = parse_listing(&html, &ctx.url);
        tracing::debug!(source = %ctx.source_key, count = entries.len(), "parsed listing page");
        Ok(entries)
    }
}
