//! Optional LRU response cache for non-streaming completions (§4.6 "Cache").
//!
//! Grounded on the teacher's `ai/cache.rs`, which by the time it reached the
//! retrieval pack had been stripped down to a comment confirming the
//! intended shape (`lru::LruCache` keyed by a derived string) without a
//! surviving implementation. This rebuilds that shape against the actual
//! cache key this spec defines: canonical JSON serialization of `(model,
//! messages, params, tools, response_format)` (§4.6), not a provider-specific
//! hash.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::types::CompletionResponse;

const DEFAULT_CAPACITY: usize = 256;

/// Thread-safe wrapper around an `lru::LruCache`. Streaming requests never
/// pass through this type — only [`super::client::ModelClient::complete`]
/// callers consult it.
pub struct ResponseCache {
    inner: Mutex<LruCache<String, CompletionResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero"));
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<CompletionResponse> {
        self.inner.lock().expect("response cache lock poisoned").get(key).cloned()
    }

    pub fn put(&self, key: String, response: CompletionResponse) {
        self.inner.lock().expect("response cache lock poisoned").put(key, response);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("response cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
