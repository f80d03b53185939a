use std::collections::HashSet;

use crate::candidate::MatchRecord;

/// Target URLs already confirmed as matched.
///
/// Rehydrated once per sweep from the durable matched list and only grown
/// afterwards; entries are removed solely by clearing the matched list.
#[derive(Debug, Clone, Default)]
pub struct DedupCache {
    seen: HashSet<String>,
}

impl DedupCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from persisted match records.
    pub fn from_records(records: &[MatchRecord]) -> Self {
        let mut cache = Self::new();
        cache.rehydrate(records);
        cache
    }

    /// Merge the target URLs of `records` into the cache without logging.
    pub fn rehydrate(&mut self, records: &[MatchRecord]) {
        self.seen.extend(
            records
                .iter()
                .map(|r| r.target_url.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }

    /// Whether `key` is known to have matched already.
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key.trim())
    }

    /// Insert `key`; returns `true` only on first insertion.
    pub fn add(&mut self, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        let inserted = self.seen.insert(key.to_string());
        if inserted {
            log::info!("dedup: {key} marked as matched");
        }
        inserted
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(url: &str) -> MatchRecord {
        MatchRecord {
            identifier: None,
            target_url: url.to_string(),
            matched_at: Utc::now(),
            payload: None,
        }
    }

    #[test]
    fn add_is_idempotent() {
        let mut cache = DedupCache::new();
        assert!(cache.add("https://x.test/1"));
        assert!(!cache.add("https://x.test/1"));
        assert!(!cache.add(" https://x.test/1 "));
        assert_eq!(cache.len(), 1);
        assert!(!cache.add("   "));
    }

    #[test]
    fn rehydrate_merges_records() {
        let mut cache = DedupCache::from_records(&[record("https://x.test/1"), record("")]);
        assert_eq!(cache.len(), 1);
        cache.rehydrate(&[record("https://x.test/1"), record("https://x.test/2")]);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("https://x.test/2"));
        assert!(!cache.contains("https://x.test/3"));
    }
}
