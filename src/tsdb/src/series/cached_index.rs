use std::collections::HashMap;

use tracing::debug;

use crate::options::DEFAULT_BINARY_SEARCH_CACHE_SIZE;

/// CachedIndex remembers the index key found at a position of a file, so that repeated
/// binary searches do not decode the same records again. The cache is dropped as a whole
/// when it grows past its maximum size or when the observed count of the file changes.
#[derive(Debug)]
pub struct CachedIndex<K> {
    values: HashMap<u64, K>,
    max_size: Option<usize>,
    count: Option<u64>,
}

/// max_cache_size resolves a configured size: 0 selects the default, negative disables.
fn max_cache_size(configured: i32) -> Option<usize> {
    match configured {
        0 => Some(DEFAULT_BINARY_SEARCH_CACHE_SIZE),
        n if n < 0 => None,
        n => Some(n as usize),
    }
}

impl<K: Copy + Ord> CachedIndex<K> {
    pub fn new(configured_size: i32) -> Self {
        Self {
            values: HashMap::new(),
            max_size: max_cache_size(configured_size),
            count: None,
        }
    }

    pub fn set_max_size(&mut self, configured_size: i32) {
        self.max_size = max_cache_size(configured_size);
        self.values.clear();
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// count records the authoritative count of the file. When it differs from the last
    /// observed count, the cache is cleared and `on_invalidate` runs.
    pub fn count<F>(&mut self, count: u64, on_invalidate: F) -> u64
    where
        F: FnOnce(),
    {
        if self.count != Some(count) {
            if self.count.is_some() {
                debug!(old = ?self.count, new = count, "count changed, invalidating index cache");
            }
            self.values.clear();
            self.count = Some(count);
            on_invalidate();
        }
        count
    }

    /// invalidate forgets everything, including the observed count.
    pub fn invalidate(&mut self) {
        self.values.clear();
        self.count = None;
    }

    /// value_at returns the key at `position`, computing it with `f` on a miss.
    pub fn value_at<F>(&mut self, position: u64, f: &mut F) -> anyhow::Result<K>
    where
        F: FnMut(u64) -> anyhow::Result<K>,
    {
        let max_size = match self.max_size {
            Some(max_size) => max_size,
            None => return f(position),
        };

        if let Some(v) = self.values.get(&position) {
            return Ok(*v);
        }

        let v = f(position)?;
        if self.values.len() >= max_size {
            self.values.clear();
        }
        self.values.insert(position, v);
        Ok(v)
    }

    /// lower_bound returns the first position in `0..count` whose key is not less than
    /// `key`, or `count` if there is none.
    pub fn lower_bound<F>(&mut self, count: u64, key: K, mut f: F) -> anyhow::Result<u64>
    where
        F: FnMut(u64) -> anyhow::Result<K>,
    {
        let (mut lo, mut hi) = (0, count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.value_at(mid, &mut f)? < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// upper_bound returns the first position in `0..count` whose key is greater than
    /// `key`, or `count` if there is none.
    pub fn upper_bound<F>(&mut self, count: u64, key: K, mut f: F) -> anyhow::Result<u64>
    where
        F: FnMut(u64) -> anyhow::Result<K>,
    {
        let (mut lo, mut hi) = (0, count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.value_at(mid, &mut f)? <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use rand::Rng;

    use crate::series::cached_index::CachedIndex;

    #[test]
    fn test_bounds() {
        let keys = vec![1, 3, 3, 3, 7, 9];
        let mut index = CachedIndex::new(0);
        let lookup = |i: u64| Ok(keys[i as usize]);

        let n = keys.len() as u64;
        assert_eq!(index.lower_bound(n, 0, lookup).unwrap(), 0);
        assert_eq!(index.lower_bound(n, 3, lookup).unwrap(), 1);
        assert_eq!(index.upper_bound(n, 3, lookup).unwrap(), 4);
        assert_eq!(index.lower_bound(n, 8, lookup).unwrap(), 5);
        assert_eq!(index.upper_bound(n, 9, lookup).unwrap(), 6);
        assert_eq!(index.lower_bound(0, 9, lookup).unwrap(), 0);
    }

    #[test]
    fn test_cache_hits() {
        let calls = Cell::new(0);
        let lookup = |i: u64| {
            calls.set(calls.get() + 1);
            Ok(i as i64 * 10)
        };

        let mut index = CachedIndex::new(0);
        index.lower_bound(1000, 4550, lookup).unwrap();
        let first = calls.get();
        index.lower_bound(1000, 4550, lookup).unwrap();
        assert_eq!(calls.get(), first);

        let mut disabled = CachedIndex::new(-1);
        assert_eq!(disabled.max_size(), None);
        disabled.lower_bound(1000, 4550, lookup).unwrap();
        disabled.lower_bound(1000, 4550, lookup).unwrap();
        assert_eq!(calls.get(), first * 3);
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_count_change_invalidates() {
        let mut index = CachedIndex::new(4);
        let mut invalidated = 0;

        index.count(10, || invalidated += 1);
        index.value_at(3, &mut |_| Ok(30)).unwrap();
        assert_eq!(index.len(), 1);

        index.count(10, || invalidated += 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.value_at(3, &mut |_| Ok(-1)).unwrap(), 30);

        index.count(11, || invalidated += 1);
        assert!(index.is_empty());
        assert_eq!(index.value_at(3, &mut |_| Ok(31)).unwrap(), 31);
        assert_eq!(invalidated, 2);
    }

    #[test]
    fn test_overflow_clears() {
        let mut index = CachedIndex::new(2);
        for i in 0..5 {
            index.value_at(i, &mut |i| Ok(i)).unwrap();
            assert!(index.len() <= 2);
        }
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_small_cache_same_results() {
        let mut rng = rand::thread_rng();
        let mut keys: Vec<i64> = (0..500).map(|_| rng.gen_range(0..200)).collect();
        keys.sort();
        let lookup = |i: u64| Ok(keys[i as usize]);

        let mut small = CachedIndex::new(3);
        let mut large = CachedIndex::new(1000);
        for _ in 0..200 {
            let key = rng.gen_range(-10..210);
            let expected = keys.partition_point(|k| *k < key) as u64;
            assert_eq!(small.lower_bound(500, key, lookup).unwrap(), expected);
            assert_eq!(large.lower_bound(500, key, lookup).unwrap(), expected);
        }
    }
}
