//! Series files keep records ordered by an index key. Two encodings share the append,
//! search and truncate contract of `SeriesFile`:
//!
//! * `RawSeriesFile` stores every record in a fixed-size slot.
//! * `CompressedSeriesFile` packs records into blocks with a field codec tree.

pub mod cached_index;
pub mod compressed_file;
pub mod header;
pub mod raw_file;
pub mod stat;
pub mod stream;

use std::fmt::Debug;

use seriesdb_storage::{LocalFile, MmapReadableFile, StorageFile};

use crate::codec::raw::RawStruct;
use crate::error::SeriesError;
use crate::field::RecordFields;
use crate::series::stat::SeriesStat;
use crate::series::stream::{Records, Segments};

/// IndexKey is the totally ordered key of a series.
pub trait IndexKey: Ord + Copy + Debug + Send + Sync + 'static {}

impl<K> IndexKey for K where K: Ord + Copy + Debug + Send + Sync + 'static {}

/// SeriesRecord is a fixed-layout record with a designated index field.
pub trait SeriesRecord: RawStruct + RecordFields + Send + Sync {
    type Index: IndexKey;

    /// INDEX_FIELD names the member holding the index.
    const INDEX_FIELD: &'static str;

    fn index(&self) -> Self::Index;
}

/// TruncateTarget selects how much of a file `truncate_file` keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateTarget<K> {
    /// keep the records whose index is less than the key
    Index(K),
    /// keep the first `n` units of the file: records for raw files, blocks for compressed files
    Count(u64),
}

/// SeriesFile is the contract shared by raw and compressed series files.
pub trait SeriesFile<T: SeriesRecord> {
    /// count returns the number of records (raw) or blocks (compressed) of the file.
    fn count(&mut self) -> anyhow::Result<u64>;

    fn first_index(&mut self) -> anyhow::Result<Option<T::Index>>;

    fn last_index(&mut self) -> anyhow::Result<Option<T::Index>>;

    /// append_data appends a sequence of batches. The batches must be ordered by index,
    /// strictly if the file enforces unique indexes. Data overlapping the end of the file
    /// is rejected unless `allow_truncation` is set, in which case the overlapped records
    /// are replaced.
    fn append_data(&mut self, batches: &[&[T]], allow_truncation: bool) -> anyhow::Result<()>;

    fn append(&mut self, items: &[T]) -> anyhow::Result<()> {
        self.append_data(&[items], false)
    }

    fn truncate_file(&mut self, target: TruncateTarget<T::Index>) -> anyhow::Result<()>;

    /// stream_segments returns the records starting at `from`, the first record with an
    /// index not less than `from`, or not greater than it when `reverse` is set. At most
    /// `max_count` records are returned.
    fn stream_segments(
        &mut self,
        from: Option<T::Index>,
        reverse: bool,
        max_count: Option<usize>,
    ) -> anyhow::Result<Segments<'_, T>>;

    /// stream is `stream_segments` flattened into single records.
    fn stream(
        &mut self,
        from: Option<T::Index>,
        reverse: bool,
        max_count: Option<usize>,
    ) -> anyhow::Result<Records<'_, T>> {
        Ok(Records::new(self.stream_segments(from, reverse, max_count)?))
    }

    fn read_all(&mut self) -> anyhow::Result<Vec<T>> {
        self.stream_segments(None, false, None)?.collect_all()
    }

    fn stats(&mut self) -> anyhow::Result<SeriesStat<T::Index>>;

    fn flush(&mut self) -> anyhow::Result<()>;
}

/// validate_batches checks the order of the records of all batches, taken as one
/// sequence, and returns the total number of records.
pub(crate) fn validate_batches<T: SeriesRecord>(
    batches: &[&[T]],
    unique_indexes: bool,
) -> anyhow::Result<usize> {
    let mut prev: Option<T::Index> = None;
    let mut position = 0;

    for item in batches.iter().flat_map(|b| b.iter()) {
        let key = item.index();
        if let Some(prev) = prev {
            if key < prev {
                return Err(SeriesError::Unordered {
                    position,
                    prev: Box::new(prev),
                    value: Box::new(key),
                }
                .into());
            }
            if unique_indexes && key == prev {
                return Err(SeriesError::Duplicate {
                    position,
                    value: Box::new(key),
                }
                .into());
            }
        }
        prev = Some(key);
        position += 1;
    }

    Ok(position)
}

/// first_key returns the index of the first record of the batches.
pub(crate) fn first_key<T: SeriesRecord>(batches: &[&[T]]) -> Option<T::Index> {
    batches
        .iter()
        .flat_map(|b| b.iter())
        .next()
        .map(|item| item.index())
}

/// overlaps reports whether data starting at `first` can not simply follow data ending
/// at `last`.
pub(crate) fn overlaps<K: Ord>(first: K, last: K, unique_indexes: bool) -> bool {
    if unique_indexes {
        first <= last
    } else {
        first < last
    }
}

/// is_cut reports whether an existing record with index `key` is replaced by data
/// starting at `first`.
pub(crate) fn is_cut<K: Ord>(key: K, first: K, unique_indexes: bool) -> bool {
    if unique_indexes {
        key >= first
    } else {
        key > first
    }
}

/// open_storage opens the file at `path` for a series file.
pub(crate) fn open_storage(
    path: &str,
    read_only: bool,
    use_mmap: bool,
) -> anyhow::Result<Box<dyn StorageFile>> {
    let file: Box<dyn StorageFile> = match (read_only, use_mmap) {
        (true, true) => Box::new(MmapReadableFile::open(path)?),
        (true, false) => Box::new(LocalFile::open_read_only(path)?),
        (false, _) => Box::new(LocalFile::open(path)?),
    };
    Ok(file)
}
