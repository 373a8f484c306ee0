//! Memoization of title lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

type CacheKey = (String, Option<String>);

/// Shared cache of title → DOI lookups, keyed by the exact
/// `(title, preferred_publication_id)` pair.
///
/// A cached `None` means Crossref had no match; callers do not ask again.
/// Cloning is cheap and every clone sees the same entries.
#[derive(Debug, Clone, Default)]
pub struct DoiCache {
    inner: Arc<Mutex<HashMap<CacheKey, Option<String>>>>,
}

impl DoiCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outer `None` is a miss; `Some(None)` is a cached negative result.
    #[must_use]
    #[allow(clippy::option_option)]
    pub fn get(&self, title: &str, preferred: Option<&str>) -> Option<Option<String>> {
        let key = (title.to_owned(), preferred.map(str::to_owned));
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(&key).cloned()
    }

    pub fn insert(&self, title: &str, preferred: Option<&str>, doi: Option<String>) {
        let key = (title.to_owned(), preferred.map(str::to_owned));
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(key, doi);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_negative_results_from_misses() {
        let cache = DoiCache::new();
        assert_eq!(cache.get("A title", None), None);
        cache.insert("A title", None, None);
        assert_eq!(cache.get("A title", None), Some(None));
    }

    #[test]
    fn preferred_prefix_is_part_of_the_key() {
        let cache = DoiCache::new();
        cache.insert("A title", Some("10.3102"), Some("10.3102/x".to_owned()));
        assert_eq!(cache.get("A title", None), None);
        assert_eq!(
            cache.get("A title", Some("10.3102")),
            Some(Some("10.3102/x".to_owned()))
        );
    }

    #[test]
    fn clones_share_entries() {
        let cache = DoiCache::new();
        let other = cache.clone();
        other.insert("t", None, None);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(other.is_empty());
    }
}
