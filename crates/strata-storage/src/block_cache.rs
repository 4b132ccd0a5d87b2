//! Byte-bounded LRU cache of decoded blocks, shared by all readers.

use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use strata_core::id::SegmentId;
use strata_core::types::Scalar;

/// (segment, column, block)
pub type BlockKey = (SegmentId, usize, usize);

struct Cached {
    values: Arc<Vec<Scalar>>,
    bytes: usize,
}

struct Inner {
    lru: LruCache<BlockKey, Cached>,
    bytes: usize,
    hits: u64,
    misses: u64,
}

pub struct BlockCache {
    inner: Mutex<Inner>,
    capacity_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bytes: usize,
    pub entries: usize,
}

impl BlockCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                bytes: 0,
                hits: 0,
                misses: 0,
            }),
            capacity_bytes,
        }
    }

    // Cache bookkeeping must never fail a read, so poisoning is tolerated.
    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &BlockKey) -> Option<Arc<Vec<Scalar>>> {
        let mut inner = self.inner();
        let found = inner.lru.get(key).map(|c| Arc::clone(&c.values));
        match found {
            Some(v) => {
                inner.hits += 1;
                Some(v)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a decoded block. Blocks larger than the whole budget are not kept.
    pub fn insert(&self, key: BlockKey, values: Arc<Vec<Scalar>>) {
        let bytes: usize = values.iter().map(Scalar::approx_size).sum();
        if bytes > self.capacity_bytes {
            return;
        }
        let mut inner = self.inner();
        if let Some(old) = inner.lru.put(key, Cached { values, bytes }) {
            inner.bytes -= old.bytes;
        }
        inner.bytes += bytes;
        while inner.bytes > self.capacity_bytes {
            match inner.lru.pop_lru() {
                Some((evicted, c)) => {
                    inner.bytes -= c.bytes;
                    tracing::trace!(segment = %evicted.0, column = evicted.1, block = evicted.2, "block evicted");
                }
                None => break,
            }
        }
    }

    /// Drop every cached block of `segment`.
    pub fn evict_segment(&self, segment: SegmentId) {
        let mut inner = self.inner();
        let keys: Vec<BlockKey> = inner
            .lru
            .iter()
            .filter(|(k, _)| k.0 == segment)
            .map(|(k, _)| *k)
            .collect();
        for k in keys {
            if let Some(c) = inner.lru.pop(&k) {
                inner.bytes -= c.bytes;
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner();
        inner.lru.clear();
        inner.bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            bytes: inner.bytes,
            entries: inner.lru.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(n: i64) -> Arc<Vec<Scalar>> {
        Arc::new((0..n).map(Scalar::I64).collect())
    }

    #[test]
    fn evicts_least_recent_when_over_budget() {
        let cache = BlockCache::new(8 * 20);
        let s = SegmentId::new(1);
        cache.insert((s, 0, 0), block(10));
        cache.insert((s, 0, 1), block(10));
        assert!(cache.get(&(s, 0, 0)).is_some()); // block 0 now most recent
        cache.insert((s, 0, 2), block(10));
        assert!(cache.get(&(s, 0, 1)).is_none());
        assert!(cache.get(&(s, 0, 0)).is_some());
        assert_eq!(cache.stats().bytes, 160);
    }

    #[test]
    fn oversized_blocks_are_not_cached() {
        let cache = BlockCache::new(8);
        cache.insert((SegmentId::new(1), 0, 0), block(2));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn evict_segment_only_touches_that_segment() {
        let cache = BlockCache::new(1 << 20);
        cache.insert((SegmentId::new(1), 0, 0), block(1));
        cache.insert((SegmentId::new(2), 0, 0), block(1));
        cache.evict_segment(SegmentId::new(1));
        let st = cache.stats();
        assert_eq!(st.entries, 1);
        assert_eq!(st.bytes, 8);
    }
}
