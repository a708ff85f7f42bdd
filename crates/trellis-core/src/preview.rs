//! Bounded cache of preview content pushed by the editor.
//!
//! The host creates one cache per process and drops it on shutdown. There
//! is no global instance.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::model::Content;

pub const DEFAULT_PREVIEW_CAPACITY: usize = 500;

pub struct PreviewCache {
    entries: Mutex<LruCache<String, Content>>,
}

impl PreviewCache {
    /// A cache holding at most `capacity` documents (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Store `content` under `key`, evicting the least recently used entry
    /// when full. Returns the content previously stored under `key`.
    pub fn put(&self, key: impl Into<String>, content: Content) -> Option<Content> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.put(key.into(), content)
    }

    /// Look up and mark as recently used.
    pub fn get(&self, key: &str) -> Option<Content> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Content> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.pop(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.cap().get())
            .unwrap_or(DEFAULT_PREVIEW_CAPACITY)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.clear();
    }

    /// Cached keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_CAPACITY)
    }
}

impl std::fmt::Debug for PreviewCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> Content {
        Content {
            id: Some(id.into()),
            ..Content::default()
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = PreviewCache::new(2);
        cache.put("a", doc("a"));
        cache.put("b", doc("b"));
        assert!(cache.get("a").is_some());
        cache.put("c", doc("c"));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.keys(), vec!["c", "a"]);
    }

    #[test]
    fn replaces_existing_keys() {
        let cache = PreviewCache::default();
        assert!(cache.put("a", doc("1")).is_none());
        let previous = cache.put("a", doc("2"));
        assert_eq!(previous.and_then(|c| c.id), Some("1".to_string()));
        assert_eq!(cache.get("a").and_then(|c| c.id), Some("2".to_string()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.capacity(), 500);
    }

    #[test]
    fn zero_capacity_still_holds_one() {
        let cache = PreviewCache::new(0);
        cache.put("a", doc("a"));
        cache.put("b", doc("b"));
        assert_eq!(cache.keys(), vec!["b"]);
        assert!(cache.remove("b").is_some());
        assert!(cache.is_empty());
    }
}
