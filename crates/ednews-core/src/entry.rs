//! The normalized entry record produced by preprocessors.

use serde::{Deserialize, Serialize};

/// Stored as `published` when a source gives no publication date, so the
/// `(guid, link, title, published)` uniqueness constraint still applies.
pub const MISSING_PUBLISHED_SENTINEL: &str = "1970-01-01T00:00:00+00:00";

/// One normalized record emitted by a preprocessor.
///
/// Bibliographic fields (`doi`, `authors`, `abstract_text`, `crossref_raw`)
/// are filled in by postprocessors; preprocessors usually leave them empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<String>,
    pub doi: Option<String>,
    pub authors: Option<String>,
    pub abstract_text: Option<String>,
    pub crossref_raw: Option<String>,
}

fn non_blank(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl Entry {
    /// An entry with no title, link, summary, body or abstract carries nothing
    /// worth persisting.
    #[must_use]
    pub fn has_content(&self) -> bool {
        non_blank(self.title.as_ref())
            || non_blank(self.link.as_ref())
            || non_blank(self.summary.as_ref())
            || non_blank(self.content.as_ref())
            || non_blank(self.abstract_text.as_ref())
    }

    /// Feed-level identity: guid, falling back to link, then title.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        [&self.guid, &self.link, &self.title]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    /// `published` or the sentinel when absent/blank.
    #[must_use]
    pub fn published_or_sentinel(&self) -> &str {
        self.published
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(MISSING_PUBLISHED_SENTINEL)
    }

    /// Body text for embedding and display: summary, then content.
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        [&self.summary, &self.content]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.trim().is_empty())
    }
}

/// Exact, case-insensitive title match against the configured filters.
///
/// `filters` are expected to be lowercased already (see `AppConfig`).
#[must_use]
pub fn title_is_filtered(title: Option<&str>, filters: &[String]) -> bool {
    let Some(title) = title else {
        return false;
    };
    let normalized = title.trim().to_lowercase();
    !normalized.is_empty() && filters.iter().any(|f| f.trim() == normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entry_has_no_content() {
        assert!(!Entry::default().has_content());
    }

    #[test]
    fn whitespace_only_fields_do_not_count_as_content() {
        let entry = Entry {
            title: Some("   ".to_string()),
            summary: Some("\n".to_string()),
            ..Entry::default()
        };
        assert!(!entry.has_content());
    }

    #[test]
    fn any_single_field_counts_as_content() {
        let link_only = Entry {
            link: Some("https://example.org/a".to_string()),
            ..Entry::default()
        };
        let body_only = Entry {
            content: Some("<p>body</p>".to_string()),
            ..Entry::default()
        };
        let abstract_only = Entry {
            abstract_text: Some("We study...".to_string()),
            ..Entry::default()
        };
        assert!(link_only.has_content());
        assert!(body_only.has_content());
        assert!(abstract_only.has_content());
    }

    #[test]
    fn identity_prefers_guid_then_link_then_title() {
        let mut entry = Entry {
            guid: Some(" ".to_string()),
            link: Some("https://example.org/x".to_string()),
            title: Some("X".to_string()),
            ..Entry::default()
        };
        assert_eq!(entry.identity(), Some("https://example.org/x"));
        entry.guid = Some("urn:1".to_string());
        assert_eq!(entry.identity(), Some("urn:1"));
        entry.guid = None;
        entry.link = None;
        assert_eq!(entry.identity(), Some("X"));
    }

    #[test]
    fn missing_published_uses_sentinel() {
        let entry = Entry::default();
        assert_eq!(entry.published_or_sentinel(), MISSING_PUBLISHED_SENTINEL);
        let dated = Entry {
            published: Some("2024-11-01".to_string()),
            ..Entry::default()
        };
        assert_eq!(dated.published_or_sentinel(), "2024-11-01");
    }

    #[test]
    fn title_filter_is_exact_and_case_insensitive() {
        let filters = vec!["editorial board".to_string()];
        assert!(title_is_filtered(Some("Editorial Board"), &filters));
        assert!(title_is_filtered(Some("  EDITORIAL BOARD "), &filters));
        assert!(!title_is_filtered(
            Some("Editorial board changes in 2024"),
            &filters
        ));
        assert!(!title_is_filtered(None, &filters));
        assert!(!title_is_filtered(Some(""), &filters));
    }
}
