//! Normalization of the `processor` field in a source configuration.
//!
//! The field accepts three shapes:
//!
//! - a bare name: `"rss"` (preprocessor only)
//! - a pair object: `{"pre": "rss", "post": ["crossref"]}`
//! - a two-element list: `["rss", "crossref"]`, the older spelling of the pair
//!
//! All of them deserialize straight into [`ProcessorSpec`], so nothing
//! downstream ever sees the original shape.

use serde::{Deserialize, Serialize};

const DEFAULT_PREPROCESSOR: &str = "rss";

/// Normalized `{pre, post}` processor chain for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProcessorSpec")]
pub struct ProcessorSpec {
    pub pre: Vec<String>,
    pub post: Vec<String>,
}

impl Default for ProcessorSpec {
    fn default() -> Self {
        Self {
            pre: vec![DEFAULT_PREPROCESSOR.to_string()],
            post: Vec::new(),
        }
    }
}

impl ProcessorSpec {
    /// Build a spec from already-split name lists, applying the same cleanup
    /// as deserialization.
    #[must_use]
    pub fn new(pre: Vec<String>, post: Vec<String>) -> Self {
        let mut pre = clean_names(pre);
        if pre.is_empty() {
            pre.push(DEFAULT_PREPROCESSOR.to_string());
        }
        Self {
            pre,
            post: clean_names(post),
        }
    }
}

/// A single name or a list of names.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NameList {
    One(String),
    Many(Vec<String>),
}

impl NameList {
    fn into_vec(self) -> Vec<String> {
        match self {
            NameList::One(name) => vec![name],
            NameList::Many(names) => names,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawProcessorSpec {
    Absent,
    Name(String),
    Pair {
        #[serde(default)]
        pre: Option<NameList>,
        #[serde(default)]
        post: Option<NameList>,
    },
    List(Vec<Option<NameList>>),
}

impl TryFrom<RawProcessorSpec> for ProcessorSpec {
    type Error = String;

    fn try_from(raw: RawProcessorSpec) -> Result<Self, Self::Error> {
        let flatten = |names: Option<NameList>| names.map(NameList::into_vec).unwrap_or_default();

        match raw {
            RawProcessorSpec::Absent => Ok(Self::default()),
            RawProcessorSpec::Name(name) => Ok(Self::new(vec![name], Vec::new())),
            RawProcessorSpec::Pair { pre, post } => Ok(Self::new(flatten(pre), flatten(post))),
            RawProcessorSpec::List(items) => {
                if items.len() > 2 {
                    return Err(format!(
                        "processor list must have at most two elements [pre, post], got {}",
                        items.len()
                    ));
                }
                let mut items = items.into_iter();
                let pre = flatten(items.next().flatten());
                let post = flatten(items.next().flatten());
                Ok(Self::new(pre, post))
            }
        }
    }
}

fn clean_names(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let trimmed = name.trim();
        if !trimmed.is_empty() && !out.iter().any(|n| n == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ProcessorSpec {
        serde_json::from_str(json).expect("processor spec should parse")
    }

    #[test]
    fn bare_name_is_preprocessor_only() {
        let spec = parse(r#""sciencedirect""#);
        assert_eq!(spec.pre, vec!["sciencedirect"]);
        assert!(spec.post.is_empty());
    }

    #[test]
    fn all_three_forms_normalize_identically() {
        let pair = parse(r#"{"pre": "rss", "post": "crossref"}"#);
        let list = parse(r#"["rss", "crossref"]"#);
        let nested = parse(r#"{"pre": ["rss"], "post": ["crossref"]}"#);
        assert_eq!(pair, list);
        assert_eq!(pair, nested);
        assert_eq!(pair.pre, vec!["rss"]);
        assert_eq!(pair.post, vec!["crossref"]);
    }

    #[test]
    fn pair_without_pre_defaults_to_rss() {
        let spec = parse(r#"{"post": "crossref"}"#);
        assert_eq!(spec.pre, vec!["rss"]);
        assert_eq!(spec.post, vec!["crossref"]);
    }

    #[test]
    fn null_is_the_default_chain() {
        assert_eq!(parse("null"), ProcessorSpec::default());
    }

    #[test]
    fn single_element_list_is_preprocessor_only() {
        let spec = parse(r#"["html-list"]"#);
        assert_eq!(spec.pre, vec!["html-list"]);
        assert!(spec.post.is_empty());
    }

    #[test]
    fn list_with_null_pre_uses_default() {
        let spec = parse(r#"[null, "crossref"]"#);
        assert_eq!(spec.pre, vec!["rss"]);
        assert_eq!(spec.post, vec!["crossref"]);
    }

    #[test]
    fn names_are_trimmed_and_deduplicated() {
        let spec = parse(r#"{"pre": [" rss ", "rss", ""], "post": []}"#);
        assert_eq!(spec.pre, vec!["rss"]);
        assert!(spec.post.is_empty());
    }

    #[test]
    fn three_element_list_is_rejected() {
        let result = serde_json::from_str::<ProcessorSpec>(r#"["a", "b", "c"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn numbers_are_rejected() {
        let result = serde_json::from_str::<ProcessorSpec>("42");
        assert!(result.is_err());
    }
}
