//! Resolution cache.
//!
//! Keyed by the input document's content hash and a digest of the reference,
//! so an entry can only ever be reused against byte-identical input. Reads
//! are lock-free per shard; a miss computes and inserts, and a racing insert
//! of the same key stores the same value.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::digest::fnv1a64_parts;
use crate::model::NodeRef;
use crate::resolver::{Anchor, ResolveError, ResolveLimits};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// `sha256:` digest of the input document.
    pub document: String,
    /// `fnv1a64:` digest of the reference's locators and the resolve limits.
    pub target: String,
}

impl CacheKey {
    pub fn new(document_digest: &str, target: &NodeRef, limits: &ResolveLimits) -> Self {
        let fp_chain = target
            .fingerprint
            .as_ref()
            .map(|f| f.chain.as_str())
            .unwrap_or("");
        let fp_hash = target
            .fingerprint
            .as_ref()
            .map(|f| f.text_hash.as_str())
            .unwrap_or("");
        let depth = limits.max_path_depth.to_string();
        let candidates = limits.max_snippet_candidates.to_string();
        Self {
            document: document_digest.to_string(),
            target: fnv1a64_parts(&[
                ("selector", target.selector.as_deref().unwrap_or("")),
                ("path", target.path.as_deref().unwrap_or("")),
                ("snippet", target.snippet.as_deref().unwrap_or("")),
                ("fp.chain", fp_chain),
                ("fp.text", fp_hash),
                ("depth", &depth),
                ("candidates", &candidates),
            ]),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: DashMap<CacheKey, Result<Anchor, ResolveError>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Result<Anchor, ResolveError>> {
        let found = self.entries.get(key).map(|e| e.value().clone());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, key: CacheKey, value: Result<Anchor, ResolveError>) {
        self.entries.insert(key, value);
    }

    /// Return the cached result for `key`, computing and storing it on miss.
    pub fn get_or_resolve<F>(&self, key: CacheKey, resolve: F) -> Result<Anchor, ResolveError>
    where
        F: FnOnce() -> Result<Anchor, ResolveError>,
    {
        if let Some(hit) = self.get(&key) {
            return hit;
        }
        let value = resolve();
        self.insert(key, value.clone());
        value
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
