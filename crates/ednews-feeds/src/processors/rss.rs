//! RSS 2.0 and Atom feed parsing.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use ednews_core::Entry;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::error::FeedError;
use crate::processor::{fetch_text, FetchContext, Preprocessor};

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("valid regex"));

/// One parsed `<item>` / `<entry>` plus its category terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub entry: Entry,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Guid,
    Summary,
    Content,
    Published,
    Updated,
    Category,
    Doi,
    Author,
}

fn field_for(name: &[u8]) -> Option<Field> {
    Some(match name {
        b"title" => Field::Title,
        b"link" => Field::Link,
        b"guid" | b"id" => Field::Guid,
        b"description" | b"summary" => Field::Summary,
        b"content:encoded" | b"content" => Field::Content,
        b"pubDate" | b"published" | b"dc:date" => Field::Published,
        b"updated" => Field::Updated,
        b"category" | b"dc:subject" => Field::Category,
        b"dc:identifier" | b"prism:doi" => Field::Doi,
        b"dc:creator" | b"name" => Field::Author,
        _ => return None,
    })
}

#[derive(Default)]
struct ItemBuilder {
    title: String,
    link: String,
    guid: String,
    summary: String,
    content: String,
    published: String,
    updated: String,
    doi: String,
    authors: Vec<String>,
    categories: Vec<String>,
}

impl ItemBuilder {
    fn push_text(&mut self, field: Field, text: &str) {
        match field {
            Field::Title => self.title.push_str(text),
            Field::Link => self.link.push_str(text),
            Field::Guid => self.guid.push_str(text),
            Field::Summary => self.summary.push_str(text),
            Field::Content => self.content.push_str(text),
            Field::Published => self.published.push_str(text),
            Field::Updated => self.updated.push_str(text),
            Field::Doi => self.doi.push_str(text),
            Field::Author => push_unique(&mut self.authors, text),
            Field::Category => push_unique(&mut self.categories, text),
        }
    }

    /// Atom carries links and categories as attributes.
    fn absorb_attributes(&mut self, e: &BytesStart<'_>) {
        match e.name().as_ref() {
            b"link" => {
                let rel = attr(e, b"rel");
                let href = attr(e, b"href");
                if let Some(href) = href {
                    let alternate = rel.as_deref().is_none_or(|r| r == "alternate");
                    if self.link.is_empty() && alternate {
                        self.link = href;
                    }
                }
            }
            b"category" => {
                if let Some(term) = attr(e, b"term").or_else(|| attr(e, b"label")) {
                    push_unique(&mut self.categories, &term);
                }
            }
            _ => {}
        }
    }

    fn build(self) -> FeedItem {
        let published = non_empty(self.published).or_else(|| non_empty(self.updated));
        FeedItem {
            entry: Entry {
                guid: non_empty(self.guid),
                title: non_empty(self.title),
                link: non_empty(self.link),
                summary: non_empty(self.summary),
                content: non_empty(self.content),
                published,
                doi: non_empty(self.doi),
                authors: (!self.authors.is_empty()).then(|| self.authors.join(", ")),
                ..Entry::default()
            },
            categories: self.categories,
        }
    }
}

fn push_unique(list: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() && !list.iter().any(|t| t == text) {
        list.push(text.to_owned());
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Parse an RSS or Atom document into items, in document order.
///
/// # Errors
///
/// Returns [`FeedError::Parse`] if the XML is malformed.
pub fn parse_feed(xml: &str, url: &str) -> Result<Vec<FeedItem>, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    // Element name and field currently capturing text.
    let mut capturing: Option<(Vec<u8>, Field)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"item" || name == b"entry" {
                    current = Some(ItemBuilder::default());
                    capturing = None;
                    continue;
                }
                let Some(item) = current.as_mut() else {
                    continue;
                };
                item.absorb_attributes(&e);
                // Markup nested inside a captured field (XHTML content) is
                // flattened into that field.
                if capturing.is_none() {
                    if let Some(field) = field_for(&name) {
                        capturing = Some((name, field));
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(item) = current.as_mut() {
                    item.absorb_attributes(&e);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                if name.as_ref() == b"item" || name.as_ref() == b"entry" {
                    if let Some(item) = current.take() {
                        items.push(item.build());
                    }
                    capturing = None;
                } else if capturing
                    .as_ref()
                    .is_some_and(|(open, _)| open.as_slice() == name.as_ref())
                {
                    capturing = None;
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(item), Some((_, field))) = (current.as_mut(), capturing.as_ref()) {
                    let text = e.unescape().map_err(|err| parse_error(url, &err))?;
                    item.push_text(*field, &text);
                }
            }
            Ok(Event::CData(e)) => {
                if let (Some(item), Some((_, field))) = (current.as_mut(), capturing.as_ref()) {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    item.push_text(*field, &text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(url, &e)),
            _ => {}
        }
    }

    Ok(items)
}

fn parse_error(url: &str, err: &dyn std::fmt::Display) -> FeedError {
    FeedError::Parse {
        url: url.to_owned(),
        message: err.to_string(),
    }
}

/// Calendar date of a feed timestamp, if one can be read.
///
/// RFC 2822 and RFC 3339 timestamps are parsed in their own offset; any
/// other string is searched for an ISO `YYYY-MM-DD`.
#[must_use]
pub fn entry_date(published: &str) -> Option<NaiveDate> {
    let s = published.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    ISO_DATE_RE
        .captures(s)
        .and_then(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
}

/// Keep only entries published on the feed's most recent date.
///
/// When no entry has a readable date every entry is kept.
#[must_use]
pub fn keep_latest_date(entries: Vec<Entry>) -> Vec<Entry> {
    let dates: Vec<Option<NaiveDate>> = entries
        .iter()
        .map(|e| e.published.as_deref().and_then(entry_date))
        .collect();
    let Some(latest) = dates.iter().flatten().max().copied() else {
        return entries;
    };
    entries
        .into_iter()
        .zip(dates)
        .filter_map(|(entry, date)| (date == Some(latest)).then_some(entry))
        .collect()
}

/// Generic RSS/Atom preprocessor.
#[derive(Debug, Clone)]
pub struct RssPreprocessor {
    name: String,
}

impl RssPreprocessor {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl Default for RssPreprocessor {
    fn default() -> Self {
        Self::new("rss")
    }
}

#[async_trait]
impl Preprocessor for RssPreprocessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<Entry>, FeedError> {
        let body = fetch_text(&ctx.client, &ctx.url).await?;
        let items = parse_feed(&body, &ctx.url)?;
        let total = items.len();
        let entries = keep_latest_date(items.into_iter().map(|i| i.entry).collect());
        tracing::debug!(
            source = %ctx.source_key,
            total,
            kept = entries.len(),
            "parsed feed, kept entries from the latest date"
        );
        Ok(entries)
    }
}

#[cfg(test)]
#[path = "rss_test.rs"]
mod tests;
