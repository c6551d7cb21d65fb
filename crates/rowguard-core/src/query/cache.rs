//! Statement cache keyed by query text.
//!
//! Compiling a statement parses it and resolves its aliases against the
//! mapping. Both depend only on the query text, so compiled statements are
//! shared between filter calls. Population is idempotent: two threads racing
//! on the same text compile equal statements and either result may win.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use super::CompiledStatement;
use crate::error::FilterError;
use crate::mapping::MappingInformation;

/// Cached statement with its use count.
#[derive(Debug)]
struct CachedStatement {
    statement: Arc<CompiledStatement>,
    hit_count: AtomicU64,
}

impl CachedStatement {
    fn new(statement: Arc<CompiledStatement>) -> Self {
        Self {
            statement,
            hit_count: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) -> u64 {
        self.hit_count.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    fn hits(&self) -> u64 {
        self.hit_count.load(AtomicOrdering::Relaxed)
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Concurrent cache of compiled statements.
///
/// A capacity of zero disables caching. When full, the least used entry is
/// evicted.
#[derive(Debug)]
pub struct StatementCache {
    entries: DashMap<String, CachedStatement>,
    capacity: usize,
    stats: CacheStats,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Get a cached statement.
    pub fn get(&self, query: &str) -> Option<Arc<CompiledStatement>> {
        match self.entries.get(query) {
            Some(cached) => {
                let hits = cached.record_hit();
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                trace!(query, hits, "Statement cache hit");
                Some(Arc::clone(&cached.statement))
            }
            None => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                None
            }
        }
    }

    /// Insert a compiled statement, evicting the least used entry when full.
    pub fn insert(&self, query: impl Into<String>, statement: Arc<CompiledStatement>) {
        if self.capacity == 0 {
            return;
        }
        let query = query.into();
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&query) {
            self.evict_least_used();
        }
        self.entries.insert(query, CachedStatement::new(statement));
    }

    /// Return the cached statement for `query`, compiling it on a miss.
    pub fn get_or_compile(
        &self,
        query: &str,
        mapping: &MappingInformation,
    ) -> Result<Arc<CompiledStatement>, FilterError> {
        if let Some(statement) = self.get(query) {
            return Ok(statement);
        }
        let statement = Arc::new(CompiledStatement::compile(query, mapping)?);
        self.insert(query, Arc::clone(&statement));
        Ok(statement)
    }

    fn evict_least_used(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().hits())
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
