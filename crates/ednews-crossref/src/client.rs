//! HTTP client for the Crossref REST API.
//!
//! Wraps `reqwest` with Crossref-specific retry handling and response
//! parsing. A 404 is a normal "no such work" answer and surfaces as
//! `Ok(None)`; everything else that is not a 2xx is an error.

use std::sync::LazyLock;
use std::time::Duration;

use ednews_core::AppConfig;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use crate::cache::DoiCache;
use crate::dates::published_from_message;
use crate::doi::normalize_doi;
use crate::error::CrossrefError;
use crate::retry::{retry_with_backoff, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.crossref.org";
const TITLE_LOOKUP_ROWS: &str = "20";
/// Crossref caps `rows` at 1000 per page.
const JOURNAL_PAGE_MAX_ROWS: usize = 1000;

/// Characters left unescaped in the `/works/<doi>` path segment.
const DOI_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b':')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

static JATS_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Connection, timeout and retry settings for [`CrossrefClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossrefConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub retry_statuses: Vec<u16>,
    pub user_agent: String,
    /// Sent as the `mailto` query parameter for Crossref's polite pool.
    pub mailto: Option<String>,
}

impl Default for CrossrefConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            connect_timeout_secs: 5,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 300,
            retry_statuses: vec![429, 500, 502, 503, 504],
            user_agent: "ed-news-fetcher/1.0".to_owned(),
            mailto: None,
        }
    }
}

impl CrossrefConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.crossref_base_url.clone(),
            connect_timeout_secs: config.crossref_connect_timeout_secs,
            timeout_secs: config.crossref_timeout_secs,
            max_retries: config.crossref_max_retries,
            backoff_base_ms: config.crossref_backoff_ms,
            retry_statuses: config.crossref_retry_statuses.clone(),
            user_agent: config.user_agent.clone(),
            mailto: config.crossref_mailto.clone(),
        }
    }
}

/// Metadata for one Crossref work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkMetadata {
    pub doi: String,
    pub title: Option<String>,
    /// `"Given Family, Given Family"`, de-duplicated in order.
    pub authors: Option<String>,
    /// Abstract with JATS markup removed.
    pub abstract_text: Option<String>,
    /// The full JSON response body.
    pub raw: String,
    /// `YYYY-MM-DD`, or RFC 3339 when only a timestamp is available.
    pub published: Option<String>,
}

/// Filters and paging for [`CrossrefClient::fetch_journal_works`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalWorksQuery {
    /// Most works returned for one journal.
    pub limit: usize,
    /// Sort field; results are always newest first.
    pub sort_by: String,
    /// Date field the bounds below apply to, e.g. `created` or `pub`.
    pub date_filter_type: Option<String>,
    pub from_date: Option<String>,
    pub until_date: Option<String>,
}

impl Default for JournalWorksQuery {
    fn default() -> Self {
        Self {
            limit: 30,
            sort_by: "created".to_owned(),
            date_filter_type: None,
            from_date: None,
            until_date: None,
        }
    }
}

impl JournalWorksQuery {
    /// The `filter` parameter: journal articles, optionally date-bounded.
    fn filter(&self) -> String {
        let mut parts = vec!["type:journal-article".to_owned()];
        if let Some(kind) = self.date_filter_type.as_deref().filter(|k| !k.is_empty()) {
            if let Some(from) = &self.from_date {
                parts.push(format!("from-{kind}-date:{from}"));
            }
            if let Some(until) = &self.until_date {
                parts.push(format!("until-{kind}-date:{until}"));
            }
        }
        parts.join(",")
    }
}

/// One work from a journal listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalWork {
    pub doi: String,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
}

/// Client for the Crossref `/works` and `/journals` endpoints.
///
/// Use [`CrossrefClient::new`] for production or
/// [`CrossrefClient::with_base_url`] to point at a mock server in tests.
#[derive(Debug, Clone)]
pub struct CrossrefClient {
    client: Client,
    base_url: Url,
    policy: RetryPolicy,
    mailto: Option<String>,
    cache: DoiCache,
}

impl CrossrefClient {
    /// Creates a client for `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CrossrefError::Http`] if the `reqwest::Client` cannot be
    /// built, or [`CrossrefError::InvalidBaseUrl`] if the URL does not parse.
    pub fn new(config: &CrossrefConfig, cache: DoiCache) -> Result<Self, CrossrefError> {
        Self::with_base_url(config, cache, &config.base_url)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Same as [`CrossrefClient::new`].
    pub fn with_base_url(
        config: &CrossrefConfig,
        cache: DoiCache,
        base_url: &str,
    ) -> Result<Self, CrossrefError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        // Exactly one trailing slash so `join("works")` appends a segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|e| CrossrefError::InvalidBaseUrl(format!("{base_url}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            policy: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base_ms: config.backoff_base_ms,
                retry_statuses: config.retry_statuses.clone(),
            },
            mailto: config.mailto.clone().filter(|m| !m.trim().is_empty()),
            cache,
        })
    }

    /// The title lookup cache this client writes to.
    #[must_use]
    pub fn cache(&self) -> &DoiCache {
        &self.cache
    }

    /// Search Crossref by title and return the best-matching DOI.
    ///
    /// With `preferred_publication_id` the first result whose DOI starts
    /// with that prefix (case-insensitive) wins; otherwise the first result
    /// does. Answers, including "no match", are cached per
    /// `(title, preferred_publication_id)`; errors are not.
    ///
    /// # Errors
    ///
    /// - [`CrossrefError::RetriesExhausted`] when every attempt hit a
    ///   retryable failure.
    /// - [`CrossrefError::Status`] for other non-2xx statuses except 404.
    /// - [`CrossrefError::Http`] or [`CrossrefError::Deserialize`] for
    ///   transport or body failures.
    pub async fn lookup_doi_by_title(
        &self,
        title: &str,
        preferred_publication_id: Option<&str>,
    ) -> Result<Option<String>, CrossrefError> {
        if title.trim().is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.cache.get(title, preferred_publication_id) {
            tracing::debug!(title, "Crossref title lookup served from cache");
            return Ok(cached);
        }

        let url = self.works_search_url(title)?;
        let body = self.get_json(&url).await?;
        let items = body
            .as_ref()
            .and_then(|b| b.pointer("/message/items"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let found = select_doi(items, preferred_publication_id);
        match &found {
            Some(doi) => tracing::info!(title, doi = %doi, "Crossref title lookup matched"),
            None => tracing::debug!(title, "Crossref title lookup found nothing"),
        }
        self.cache.insert(title, preferred_publication_id, found.clone());
        Ok(found)
    }

    /// Fetch metadata for one DOI. `Ok(None)` means Crossref has no such
    /// work.
    ///
    /// # Errors
    ///
    /// Same as [`CrossrefClient::lookup_doi_by_title`].
    pub async fn fetch_metadata(&self, doi: &str) -> Result<Option<WorkMetadata>, CrossrefError> {
        let doi = doi.trim();
        if doi.is_empty() {
            return Ok(None);
        }
        let url = self.work_url(doi)?;
        tracing::info!(doi, url = %url, "Crossref metadata lookup");

        let Some(body) = self.get_json(&url).await? else {
            return Ok(None);
        };
        Ok(parse_work(doi, &body))
    }

    /// Latest works published in the journal with `issn`, newest first.
    ///
    /// Pages through the listing with Crossref's deep-paging cursor until
    /// `query.limit` works were seen or the listing runs out. An unknown
    /// ISSN (404) yields an empty list. Listed works without a DOI are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Same as [`CrossrefClient::lookup_doi_by_title`]; a failure on any
    /// page fails the whole call.
    pub async fn fetch_journal_works(
        &self,
        issn: &str,
        query: &JournalWorksQuery,
    ) -> Result<Vec<JournalWork>, CrossrefError> {
        let issn = issn.trim();
        if issn.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut works = Vec::new();
        let mut seen = 0usize;
        let mut cursor = "*".to_owned();
        while seen < query.limit {
            let rows = (query.limit - seen).min(JOURNAL_PAGE_MAX_ROWS);
            let url = self.journal_works_url(issn, query, rows, &cursor)?;
            let Some(body) = self.get_json(&url).await? else {
                tracing::warn!(issn, "Crossref does not know this journal");
                break;
            };
            let message = body.get("message");
            let items = message
                .and_then(|m| m.get("items"))
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            if items.is_empty() {
                break;
            }
            seen += items.len();
            works.extend(items.iter().filter_map(parse_journal_work));

            match message
                .and_then(|m| m.get("next-cursor"))
                .and_then(Value::as_str)
            {
                Some(next) if next != cursor => cursor = next.to_owned(),
                _ => break,
            }
        }

        works.truncate(query.limit);
        tracing::info!(issn, works = works.len(), "Crossref journal works fetched");
        Ok(works)
    }

    /// [`CrossrefClient::lookup_doi_by_title`] with every error logged and
    /// turned into `None`.
    pub async fn lookup_doi_by_title_or_none(
        &self,
        title: &str,
        preferred_publication_id: Option<&str>,
    ) -> Option<String> {
        match self.lookup_doi_by_title(title, preferred_publication_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(title, error = %e, "Crossref title lookup failed");
                None
            }
        }
    }

    /// [`CrossrefClient::fetch_metadata`] with every error logged and turned
    /// into `None`.
    pub async fn fetch_metadata_or_none(&self, doi: &str) -> Option<WorkMetadata> {
        match self.fetch_metadata(doi).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(doi, error = %e, "Crossref metadata lookup failed");
                None
            }
        }
    }

    fn works_search_url(&self, title: &str) -> Result<Url, CrossrefError> {
        let mut url = self
            .base_url
            .join("works")
            .map_err(|e| CrossrefError::InvalidBaseUrl(format!("{}: {e}", self.base_url)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("query.title", title);
            pairs.append_pair("rows", TITLE_LOOKUP_ROWS);
            if let Some(mailto) = &self.mailto {
                pairs.append_pair("mailto", mailto);
            }
        }
        Ok(url)
    }

    fn journal_works_url(
        &self,
        issn: &str,
        query: &JournalWorksQuery,
        rows: usize,
        cursor: &str,
    ) -> Result<Url, CrossrefError> {
        let encoded = utf8_percent_encode(issn, DOI_PATH).to_string();
        let mut url = self
            .base_url
            .join(&format!("journals/{encoded}/works"))
            .map_err(|e| CrossrefError::InvalidBaseUrl(format!("{}: {e}", self.base_url)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("sort", &query.sort_by);
            pairs.append_pair("order", "desc");
            pairs.append_pair("filter", &query.filter());
            pairs.append_pair("rows", &rows.to_string());
            pairs.append_pair("cursor", cursor);
            if let Some(mailto) = &self.mailto {
                pairs.append_pair("mailto", mailto);
            }
        }
        Ok(url)
    }

    fn work_url(&self, doi: &str) -> Result<Url, CrossrefError> {
        let encoded = utf8_percent_encode(doi, DOI_PATH).to_string();
        let mut url = self
            .base_url
            .join(&format!("works/{encoded}"))
            .map_err(|e| CrossrefError::InvalidBaseUrl(format!("{}: {e}", self.base_url)))?;
        if let Some(mailto) = &self.mailto {
            url.query_pairs_mut().append_pair("mailto", mailto);
        }
        Ok(url)
    }

    /// GET with retries. 404 is `Ok(None)`.
    async fn get_json(&self, url: &Url) -> Result<Option<Value>, CrossrefError> {
        retry_with_backoff(&self.policy, || self.get_json_once(url)).await
    }

    async fn get_json_once(&self, url: &Url) -> Result<Option<Value>, CrossrefError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(url = %url, "Crossref returned 404");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CrossrefError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| CrossrefError::Deserialize {
                context: url.to_string(),
                source: e,
            })
    }
}

/// Pick a DOI from `/works` search results.
fn select_doi(items: &[Value], preferred_publication_id: Option<&str>) -> Option<String> {
    let dois: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("DOI").and_then(Value::as_str))
        .filter(|doi| !doi.trim().is_empty())
        .collect();

    let preferred = preferred_publication_id
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty());
    if let Some(prefix) = preferred {
        if let Some(doi) = dois
            .iter()
            .find(|doi| doi.to_lowercase().starts_with(&prefix))
        {
            return Some(canonical(doi));
        }
    }
    dois.first().map(|doi| canonical(doi))
}

fn canonical(doi: &str) -> String {
    normalize_doi(doi).unwrap_or_else(|| doi.trim().to_lowercase())
}

/// Build [`WorkMetadata`] from a `/works/<doi>` response body.
fn parse_work(doi: &str, body: &Value) -> Option<WorkMetadata> {
    let message = body.get("message")?;

    let title = first_title(message);

    let abstract_text = message
        .get("abstract")
        .and_then(Value::as_str)
        .map(strip_jats)
        .filter(|a| !a.is_empty());

    Some(WorkMetadata {
        doi: message
            .get("DOI")
            .and_then(Value::as_str)
            .map_or_else(|| canonical(doi), canonical),
        title,
        authors: authors_from_message(message),
        abstract_text,
        raw: body.to_string(),
        published: published_from_message(message),
    })
}

fn first_title(message: &Value) -> Option<String> {
    message
        .get("title")
        .and_then(|t| match t {
            Value::Array(titles) => titles.first().and_then(Value::as_str),
            Value::String(s) => Some(s.as_str()),
            _ => None,
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

fn parse_journal_work(item: &Value) -> Option<JournalWork> {
    let doi = item
        .get("DOI")
        .and_then(Value::as_str)
        .and_then(normalize_doi)?;
    Some(JournalWork {
        doi,
        title: first_title(item),
        abstract_text: item
            .get("abstract")
            .and_then(Value::as_str)
            .map(strip_jats)
            .filter(|a| !a.is_empty()),
    })
}

fn authors_from_message(message: &Value) -> Option<String> {
    let mut names: Vec<String> = Vec::new();
    for author in message
        .get("author")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let name = [str_field(author, "given"), str_field(author, "family")]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let name = if name.is_empty() {
            str_field(author, "name").to_owned()
        } else {
            name
        };
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    (!names.is_empty()).then(|| names.join(", "))
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
}

/// Remove JATS/HTML tags and collapse whitespace.
fn strip_jats(raw: &str) -> String {
    let without_tags = JATS_TAG_RE.replace_all(raw, " ");
    WHITESPACE_RE.replace_all(without_tags.trim(), " ").into_owned()
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
