use super::detection::{DetectionRecord, Feature};
use super::frame::FrameSignature;
use indexmap::IndexMap;
use log::debug;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

type CacheKey = (Feature, FrameSignature);

/// 缓存命中统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

struct CacheInner {
    entries: IndexMap<CacheKey, Vec<DetectionRecord>>,
    hits: u64,
    misses: u64,
}

/// Bounded LRU of provider output keyed by feature and frame content.
///
/// Shared across calls by the service. Index 0 of the map is the least
/// recently used entry.
pub struct InferenceCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl InferenceCache {
    /// `capacity == 0` disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: IndexMap::with_capacity(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // entries are written whole, so a poisoned table is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, feature: Feature, signature: &FrameSignature) -> Option<Vec<DetectionRecord>> {
        if !self.is_enabled() {
            return None;
        }

        let mut inner = self.lock();
        let key = (feature, signature.clone());
        match inner.entries.get_index_of(&key) {
            Some(idx) => {
                let last = inner.entries.len() - 1;
                inner.entries.move_index(idx, last);
                inner.hits += 1;
                inner.entries.get_index(last).map(|(_, records)| records.clone())
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, feature: Feature, signature: &FrameSignature, records: &[DetectionRecord]) {
        if !self.is_enabled() {
            return;
        }

        let mut inner = self.lock();
        let (idx, _) = inner
            .entries
            .insert_full((feature, signature.clone()), records.to_vec());
        let last = inner.entries.len() - 1;
        inner.entries.move_index(idx, last);

        while inner.entries.len() > self.capacity {
            if let Some(((evicted, sig), _)) = inner.entries.shift_remove_index(0) {
                debug!("Cache evict {} {}", evicted, &sig.as_str()[..sig.as_str().len().min(12)]);
            }
        }
    }

    /// Cached records, or run `infer` and store its successful output.
    ///
    /// The lock is not held while `infer` runs. Returns the records and
    /// whether they came from the cache.
    pub fn get_or_insert_with<E, F>(
        &self,
        feature: Feature,
        signature: &FrameSignature,
        infer: F,
    ) -> Result<(Vec<DetectionRecord>, bool), E>
    where
        F: FnOnce() -> Result<Vec<DetectionRecord>, E>,
    {
        if let Some(records) = self.get(feature, signature) {
            return Ok((records, true));
        }
        let records = infer()?;
        self.put(feature, signature, &records);
        Ok((records, false))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::detection::BoundingBox;
    use crate::core::video::frame::Frame;
    use std::cell::Cell;

    fn sig(value: u8) -> FrameSignature {
        FrameSignature::of(&Frame::filled(4, 4, [value, value, value]))
    }

    fn labels(name: &str) -> Vec<DetectionRecord> {
        vec![DetectionRecord::label(name, 0.9, BoundingBox::new(0.0, 0.0, 2.0, 2.0))]
    }

    #[test]
    fn test_hit_skips_inference() {
        let cache = InferenceCache::new(8);
        let calls = Cell::new(0);
        let infer = || -> Result<_, ()> {
            calls.set(calls.get() + 1);
            Ok(labels("dog"))
        };

        let (first, cached) = cache.get_or_insert_with(Feature::Labels, &sig(1), infer).unwrap();
        assert!(!cached);
        let (second, cached) = cache.get_or_insert_with(Feature::Labels, &sig(1), infer).unwrap();
        assert!(cached);

        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_keys_are_per_feature() {
        let cache = InferenceCache::new(8);
        cache.put(Feature::Labels, &sig(1), &labels("dog"));
        assert!(cache.get(Feature::Faces, &sig(1)).is_none());
        assert!(cache.get(Feature::Labels, &sig(1)).is_some());
    }

    #[test]
    fn test_bound_is_never_exceeded() {
        let cache = InferenceCache::new(3);
        for i in 0..10u8 {
            cache.put(Feature::Labels, &sig(i), &labels("x"));
            assert!(cache.len() <= 3);
        }
        // the three most recent survive
        assert!(cache.get(Feature::Labels, &sig(6)).is_none());
        assert!(cache.get(Feature::Labels, &sig(7)).is_some());
        assert!(cache.get(Feature::Labels, &sig(9)).is_some());
    }

    #[test]
    fn test_read_promotes_entry() {
        let cache = InferenceCache::new(2);
        cache.put(Feature::Labels, &sig(1), &labels("a"));
        cache.put(Feature::Labels, &sig(2), &labels("b"));

        assert!(cache.get(Feature::Labels, &sig(1)).is_some());
        cache.put(Feature::Labels, &sig(3), &labels("c"));

        assert!(cache.get(Feature::Labels, &sig(1)).is_some());
        assert!(cache.get(Feature::Labels, &sig(2)).is_none());
    }

    #[test]
    fn test_failed_inference_is_not_stored() {
        let cache = InferenceCache::new(4);
        let result: Result<_, &str> = cache.get_or_insert_with(Feature::Text, &sig(5), || Err("boom"));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = InferenceCache::new(0);
        cache.put(Feature::Labels, &sig(1), &labels("dog"));
        assert!(cache.get(Feature::Labels, &sig(1)).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_clear() {
        let cache = InferenceCache::new(4);
        cache.put(Feature::Labels, &sig(1), &labels("dog"));
        cache.get(Feature::Labels, &sig(1));
        cache.clear();
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 0, entries: 0, capacity: 4 });
    }

    #[test]
    fn test_concurrent_lookups_keep_bound_and_counts() {
        let cache = InferenceCache::new(4);
        let threads = 8u8;
        let rounds = 50u8;

        std::thread::scope(|s| {
            for t in 0..threads {
                let cache = &cache;
                s.spawn(move || {
                    for r in 0..rounds {
                        let key = sig((t + r) % 6);
                        let result: Result<_, ()> =
                            cache.get_or_insert_with(Feature::Labels, &key, || Ok(labels("x")));
                        assert_eq!(result.unwrap().0, labels("x"));
                        assert!(cache.len() <= 4);
                    }
                });
            }
        });

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, threads as u64 * rounds as u64);
        assert!(stats.entries <= 4);
    }
}
