//! Descriptor cache
//!
//! Maintains an LRU cache of parsed descriptors keyed by the exact raw SQL
//! text, so repeated queries skip the scanner. A capacity of zero disables
//! caching entirely.

use crate::descriptor::QueryDescriptor;
use crate::error::Result;
use crate::parser::{ParseOptions, parse_with};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default capacity for the descriptor cache
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// A caching wrapper around the query parser
pub struct QueryCache {
    /// `None` when caching is disabled
    cache: Option<Mutex<LruCache<String, Arc<QueryDescriptor>>>>,
    options: ParseOptions,
}

impl QueryCache {
    /// Create a cache with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY, ParseOptions::default())
    }

    /// Create a cache holding at most `capacity` descriptors
    pub fn with_capacity(capacity: usize, options: ParseOptions) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            options,
        }
    }

    /// Parse SQL, reusing a cached descriptor for identical text.
    ///
    /// Parse failures are not cached.
    pub fn parse(&self, sql: &str) -> Result<Arc<QueryDescriptor>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(parse_with(sql, self.options)?));
        };

        if let Some(descriptor) = cache.lock().get(sql) {
            return Ok(descriptor.clone());
        }

        let descriptor = Arc::new(parse_with(sql, self.options)?);
        cache.lock().put(sql.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Number of cached descriptors
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the cache
    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}
