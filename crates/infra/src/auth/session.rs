//! Session cache
//!
//! Owned by exactly one connection. Holds the derived session key and the
//! last resolved header set.

use itsi_domain::{Headers, SessionCacheEntry};
use tracing::debug;

#[derive(Debug, Default)]
pub struct SessionCache {
    entry: SessionCacheEntry,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> &SessionCacheEntry {
        &self.entry
    }

    pub fn set(&mut self, entry: SessionCacheEntry) {
        self.entry = entry;
    }

    pub fn session_key(&self) -> Option<&str> {
        self.entry.session_key.as_deref()
    }

    pub fn set_session_key(&mut self, key: impl Into<String>) {
        self.entry.session_key = Some(key.into());
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.entry.headers.as_ref()
    }

    pub fn set_headers(&mut self, headers: Headers) {
        self.entry.headers = Some(headers);
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    /// Drop both the session key and the cached headers.
    pub fn clear(&mut self) {
        debug!("clearing authentication cache");
        self.entry = SessionCacheEntry::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_drops_everything() {
        let mut cache = SessionCache::new();
        cache.set_session_key("abc");
        cache.set_headers(Headers::from([("Authorization".to_string(), "Splunk abc".to_string())]));
        assert!(!cache.is_empty());

        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.session_key().is_none());
        assert!(cache.headers().is_none());
    }

    #[test]
    fn set_replaces_entry() {
        let mut cache = SessionCache::new();
        cache.set(SessionCacheEntry { session_key: Some("k".into()), headers: None });
        assert_eq!(cache.session_key(), Some("k"));
        assert_eq!(cache.get().headers, None);
    }
}
