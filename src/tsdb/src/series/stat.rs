/// SeriesStat describes a series file at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStat<K> {
    pub path: String,
    /// total size in bytes, header included
    pub file_size: u64,
    pub header_size: u64,
    /// records of a raw file, blocks of a compressed file
    pub count: u64,
    pub first_index: Option<K>,
    pub last_index: Option<K>,
    /// None for raw files
    pub block_size: Option<usize>,
    pub unique_indexes: bool,
}

impl<K: Ord + Copy> SeriesStat<K> {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// overlaps_index_range returns true if the index range of the file intersects min and max.
    pub fn overlaps_index_range(&self, min: K, max: K) -> bool {
        match (self.first_index, self.last_index) {
            (Some(first), Some(last)) => first <= max && last >= min,
            _ => false,
        }
    }

    /// contains_index returns true if `key` lies between the first and last index.
    pub fn contains_index(&self, key: K) -> bool {
        self.overlaps_index_range(key, key)
    }
}
