//! RSS feeds filtered down to entries carrying a category of interest.

use async_trait::async_trait;
use ednews_core::Entry;

use super::rss::{parse_feed, FeedItem};
use crate::error::FeedError;
use crate::processor::{fetch_text, FetchContext, Preprocessor};

/// Keeps feed entries whose category contains one of `categories`
/// (case-insensitive substring match, so `[Local News]` matches
/// `local news`).
#[derive(Debug, Clone)]
pub struct CategoryRssPreprocessor {
    name: String,
    categories: Vec<String>,
}

impl CategoryRssPreprocessor {
    #[must_use]
    pub fn new(name: &str, categories: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            categories: categories
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    fn matches(&self, item: &FeedItem) -> bool {
        item.categories.iter().any(|term| {
            let term = term.to_lowercase();
            self.categories.iter().any(|wanted| term.contains(wanted))
        })
    }
}

impl Default for CategoryRssPreprocessor {
    fn default() -> Self {
        Self::new("category-rss", &["local news"])
    }
}

#[async_trait]
impl Preprocessor for CategoryRssPreprocessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<Entry>, FeedError> {
        let body = fetch_text(&ctx.client, &ctx.url).await?;
        let entries: Vec<Entry> = parse_feed(&body, &ctx.url)?
            .into_iter()
            .filter(|item| self.matches(item))
            .map(|item| item.entry)
            .collect();
        tracing::debug!(source = %ctx.source_key, kept = entries.len(), "filtered feed by category");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(categories: &[&str]) -> FeedItem {
        FeedItem {
            entry: Entry::default(),
            categories: categories.iter().map(|c| (*c).to_owned()).collect(),
        }
    }

    #[test]
    fn matches_bracketed_and_cased_terms() {
        let p = CategoryRssPreprocessor::default();
        assert!(p.matches(&item(&["[Local News]"])));
        assert!(p.matches(&item(&["Sports", "LOCAL NEWS"])));
        assert!(!p.matches(&item(&["Opinion"])));
        assert!(!p.matches(&item(&[])));
    }

    #[test]
    fn custom_categories() {
        let p = CategoryRssPreprocessor::new("education-rss", &["Education", " "]);
        assert!(p.matches(&item(&["Higher Education"])));
        assert!(!p.matches(&item(&["Local News"])));
    }
}
