//! Session translation cache.
//! Key: the exact source text (no trimming, no case folding).
//! Entries are never evicted or overwritten; `clear` ends the session.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct TranslationCache {
    entries: RwLock<HashMap<String, String>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previously stored translation of `text`, if any.
    pub fn lookup(&self, text: &str) -> Option<String> {
        self.entries.read().get(text).cloned()
    }

    /// Record a translation. The first write for a key wins; returns whether
    /// this call inserted it.
    pub fn store(&self, text: &str, translated: &str) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(text) {
            return false;
        }
        entries.insert(text.to_string(), translated.to_string());
        debug!(entries = entries.len(), "translation cached");
        true
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries.read().contains_key(text)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
