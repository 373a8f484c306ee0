//! DOI detection and normalization for feed entries.

use std::sync::LazyLock;

use ednews_core::Entry;
use regex::Regex;

static DOI_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(doi:\s*|https?://(dx\.)?doi\.org/)").expect("valid regex")
});
static DOI_CORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"10\.\d{4,9}/\S+").expect("valid regex"));
static DOI_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)doi\.org/(10\.\d{4,9}/[^\s'"<>]+)"#).expect("valid regex")
});
static BARE_DOI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"10\.\d{4,9}/[^\s'"<>]+"#).expect("valid regex"));
static WORKING_PAPER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/papers/(w\d+)").expect("valid regex"));
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").expect("valid regex"));
static HTML_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// DOI prefix assigned to NBER working papers.
const NBER_PREFIX: &str = "10.3386";

const TRAILING_PUNCT: &[char] = &[' ', '.', ';', ',', ')', '/', ']'];
const WRAPPING: &[char] = &['"', '\'', '<', '>', '[', ']', '(', ')'];

/// Titles that are never worth a Crossref lookup.
const LOOKUP_BLACKLIST: &[&str] = &[
    "editorial",
    "editorial board",
    "correction",
    "corrections",
    "erratum",
    "letter to the editor",
    "front matter",
];

fn tidy(s: &str) -> &str {
    s.trim_end_matches(TRAILING_PUNCT).trim_matches(WRAPPING)
}

/// Canonicalize a DOI-like string: strip `doi:` and `doi.org` prefixes,
/// query strings, fragments and wrapping punctuation, and lowercase it.
///
/// Returns `None` when no `10.NNNN/...` pattern is present.
#[must_use]
pub fn normalize_doi(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = DOI_PREFIX_RE.replace(trimmed, "");
    let stripped = stripped.trim();
    let stripped = stripped
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let stripped = tidy(stripped);

    let core = DOI_CORE_RE.find(stripped)?.as_str();
    let core = tidy(core);
    if core.is_empty() {
        return None;
    }
    Some(core.to_lowercase())
}

/// Find the first DOI in free text, which may contain HTML.
///
/// `doi.org` links win over bare DOIs; tags are stripped before the bare
/// search so attribute noise does not leak into the match.
#[must_use]
pub fn extract_doi_from_text(text: &str) -> Option<String> {
    if let Some(caps) = DOI_URL_RE.captures(text) {
        return normalize_doi(&caps[1]);
    }
    let plain = HTML_TAG_RE.replace_all(text, " ");
    BARE_DOI_RE
        .find(&plain)
        .and_then(|m| normalize_doi(m.as_str()))
}

/// Find a DOI for a feed entry without touching the network.
///
/// Checked in order: an explicit `doi`, a `doi.org` link, a DOI inside the
/// guid, an NBER-style `/papers/wNNNN` link (using the feed's
/// `publication_id` as prefix), then the summary and content bodies.
#[must_use]
pub fn extract_doi_from_entry(entry: &Entry, feed_publication_id: Option<&str>) -> Option<String> {
    if let Some(doi) = entry.doi.as_deref().and_then(normalize_doi) {
        return Some(doi);
    }

    let link = entry.link.as_deref().unwrap_or_default();
    if let Some(caps) = DOI_URL_RE.captures(link) {
        if let Some(doi) = normalize_doi(&caps[1]) {
            return Some(doi);
        }
    }

    if let Some(m) = entry.guid.as_deref().and_then(|g| BARE_DOI_RE.find(g)) {
        if let Some(doi) = normalize_doi(m.as_str()) {
            return Some(doi);
        }
    }

    if let Some(caps) = WORKING_PAPER_RE.captures(link) {
        let prefix = feed_publication_id
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .or_else(|| link.contains("nber.org").then_some(NBER_PREFIX));
        if let Some(doi) = prefix.and_then(|p| normalize_doi(&format!("{p}/{}", &caps[1]))) {
            return Some(doi);
        }
    }

    [entry.summary.as_deref(), entry.content.as_deref()]
        .into_iter()
        .flatten()
        .find_map(extract_doi_from_text)
}

/// Whether a title is specific enough to search Crossref with.
///
/// Titles shorter than ten characters or on the blacklist are rejected.
/// Titles of three words or fewer are accepted only when they contain a
/// four-digit year or a DOI.
#[must_use]
pub fn title_suitable_for_lookup(title: &str) -> bool {
    let t = title.trim();
    if t.chars().count() < 10 {
        return false;
    }
    let lowered = t.to_lowercase();
    if LOOKUP_BLACKLIST.contains(&lowered.as_str()) {
        return false;
    }
    if t.split_whitespace().count() <= 3 {
        return YEAR_RE.is_match(t) || BARE_DOI_RE.is_match(t);
    }
    true
}

/// Whether a stored DOI plausibly belongs to a publication.
///
/// `publication_id` is usually a registrant prefix (`10.3102`) but some
/// journals are identified by a suffix segment instead (`j.econedurev`), so
/// a match is accepted at the start of the DOI, at the start of its suffix,
/// or as a whole segment after any `/`. An empty `publication_id` matches
/// everything.
#[must_use]
pub fn doi_matches_publication(doi: &str, publication_id: &str) -> bool {
    let doi = doi.trim().to_lowercase();
    let prefix = publication_id.trim().to_lowercase();
    if prefix.is_empty() || doi.starts_with(&prefix) {
        return true;
    }
    if doi
        .split_once('/')
        .is_some_and(|(_, suffix)| suffix.starts_with(&prefix))
    {
        return true;
    }
    let needle = format!("/{prefix}");
    doi.match_indices(&needle).any(|(at, _)| {
        doi[at + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit())
    })
}
