//! RawSeriesFile stores every record in a fixed-size slot right after the file header,
//! so record `i` lives at `header_size + i * item_size`.
//!
//! Custom header: | format version(4B) | unique(1B) | index field |

use bytes::{Buf, BufMut};
use seriesdb_storage::{RandomAccessFile, RandomAccessFileExt, StorageFile, WritableFile};
use tracing::{debug, info, warn};

use crate::codec::raw::RawCodec;
use crate::codec::{CodecReader, CodecWriter};
use crate::error::SeriesError;
use crate::options::SeriesOptions;
use crate::series::cached_index::CachedIndex;
use crate::series::header::{FileHeader, FileType};
use crate::series::stat::SeriesStat;
use crate::series::stream::{SegmentReader, Segments};
use crate::series::{
    first_key, open_storage, overlaps, validate_batches, SeriesFile, SeriesRecord,
    TruncateTarget,
};

/// RAW_FORMAT_VERSION is the newest custom header version.
pub const RAW_FORMAT_VERSION: u32 = 1;

/// RecordStore addresses the record slots of the underlying file.
struct RecordStore<T: SeriesRecord> {
    file: Box<dyn StorageFile>,
    codec: RawCodec<T>,
    header_size: u64,
}

impl<T: SeriesRecord> RecordStore<T> {
    fn offset(&self, position: u64) -> u64 {
        self.header_size + position * T::SIZE as u64
    }

    fn record_count(&self) -> anyhow::Result<u64> {
        let len = self.file.len()?;
        Ok(len.saturating_sub(self.header_size) / T::SIZE as u64)
    }

    /// read decodes `n` records starting at `position`.
    fn read(&self, position: u64, n: usize, out: &mut Vec<T>) -> anyhow::Result<usize> {
        let mut buf = vec![0_u8; n * T::SIZE];
        self.file.read_exact_at(self.offset(position), &mut buf)?;
        self.codec.decode_from(&buf, out)
    }

    fn key_at(&self, position: u64) -> anyhow::Result<T::Index> {
        let mut buf = vec![0_u8; T::SIZE];
        self.file.read_exact_at(self.offset(position), &mut buf)?;
        Ok(T::get(&buf).index())
    }

    /// replace_from writes `items` at `position` and cuts the file right after them.
    fn replace_from(&mut self, position: u64, items: &[T]) -> anyhow::Result<()> {
        let offset = self.offset(position);
        if !items.is_empty() {
            let mut buf = Vec::with_capacity(items.len() * T::SIZE);
            self.codec.encode(&mut buf, items);
            self.file.write_at(offset, &buf)?;
        }
        self.file.set_len(offset + (items.len() * T::SIZE) as u64)?;
        Ok(())
    }
}

/// RawSeriesFile is the uncompressed series file.
pub struct RawSeriesFile<T: SeriesRecord> {
    store: RecordStore<T>,
    options: SeriesOptions,
    unique_indexes: bool,
    initialized: bool,
    index: CachedIndex<T::Index>,
    first: Option<T::Index>,
    last: Option<T::Index>,
}

impl<T: SeriesRecord> RawSeriesFile<T> {
    pub fn create(path: &str, options: SeriesOptions) -> anyhow::Result<Self> {
        let file = seriesdb_storage::LocalFile::create(path)?;
        Self::create_with(Box::new(file), options)
    }

    pub fn create_with(file: Box<dyn StorageFile>, options: SeriesOptions) -> anyhow::Result<Self> {
        if file.len()? != 0 {
            return Err(SeriesError::AlreadyInitialized {
                path: file.path().to_string(),
            }
            .into());
        }
        let codec = RawCodec::<T>::new()?;

        info!(path = file.path(), item_size = T::SIZE, "create raw series file");
        Ok(Self {
            store: RecordStore {
                file,
                codec,
                header_size: 0,
            },
            unique_indexes: options.unique_indexes,
            initialized: false,
            index: CachedIndex::new(options.binary_search_cache_size),
            first: None,
            last: None,
            options,
        })
    }

    pub fn open(path: &str, options: SeriesOptions) -> anyhow::Result<Self> {
        let file = open_storage(path, false, false)?;
        Self::open_with(file, options)
    }

    pub fn open_read_only(path: &str, options: SeriesOptions) -> anyhow::Result<Self> {
        let file = open_storage(path, true, options.use_mmap)?;
        Self::open_with(file, options)
    }

    pub fn open_with(file: Box<dyn StorageFile>, options: SeriesOptions) -> anyhow::Result<Self> {
        let path = file.path().to_string();
        let (header, header_size) = FileHeader::read_from(file.as_ref(), &path)?;
        let codec = RawCodec::<T>::new()?;
        header.validate(&path, FileType::Raw, codec.item_size(), codec.signature())?;

        let mut b = header.custom.as_slice();
        if b.remaining() < 5 {
            return Err(SeriesError::format(&path, "custom header is too short").into());
        }
        let version = b.get_u32_le();
        if version > RAW_FORMAT_VERSION {
            return Err(
                SeriesError::format(&path, format!("unsupported format version {}", version))
                    .into(),
            );
        }
        let unique_indexes = b.get_u8() != 0;
        let index_field = CodecReader::new(b)
            .read_str()
            .map_err(|e| SeriesError::format(&path, format!("corrupt custom header: {}", e)))?
            .to_string();
        if index_field != T::INDEX_FIELD {
            return Err(SeriesError::format(
                &path,
                format!("file is indexed by {}, not by {}", index_field, T::INDEX_FIELD),
            )
            .into());
        }

        let data = file.len()?.saturating_sub(header_size);
        if data % T::SIZE as u64 != 0 {
            return Err(SeriesError::format(
                &path,
                format!("{} data bytes is not a multiple of {}", data, T::SIZE),
            )
            .into());
        }

        info!(
            path = path.as_str(),
            records = data / T::SIZE as u64,
            unique = unique_indexes,
            read_only = file.is_read_only(),
            "open raw series file"
        );
        Ok(Self {
            store: RecordStore {
                file,
                codec,
                header_size,
            },
            unique_indexes,
            initialized: true,
            index: CachedIndex::new(options.binary_search_cache_size),
            first: None,
            last: None,
            options,
        })
    }

    pub fn path(&self) -> &str {
        self.store.file.path()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn unique_indexes(&self) -> bool {
        self.unique_indexes
    }

    pub fn set_unique_indexes(&mut self, unique_indexes: bool) -> anyhow::Result<()> {
        if self.initialized {
            return Err(SeriesError::AlreadyInitialized {
                path: self.path().to_string(),
            }
            .into());
        }
        self.unique_indexes = unique_indexes;
        Ok(())
    }

    pub fn set_binary_search_cache_size(&mut self, size: i32) {
        self.options.binary_search_cache_size = size;
        self.index.set_max_size(size);
    }

    pub fn initialize_new_file(&mut self) -> anyhow::Result<()> {
        if self.initialized {
            return Err(SeriesError::AlreadyInitialized {
                path: self.path().to_string(),
            }
            .into());
        }

        let mut custom = Vec::with_capacity(16);
        custom.put_u32_le(RAW_FORMAT_VERSION);
        custom.put_u8(self.unique_indexes as u8);
        CodecWriter::new(&mut custom).write_str(T::INDEX_FIELD);

        let mut header = FileHeader::new(
            &self.options.tag,
            FileType::Raw,
            T::SIZE,
            self.store.codec.signature(),
        );
        header.custom = custom;

        let b = header.to_bytes();
        self.store.file.write_at(0, &b)?;
        self.store.file.set_len(b.len() as u64)?;
        self.store.header_size = b.len() as u64;
        self.initialized = true;
        self.index.invalidate();

        info!(path = self.path(), header_size = b.len(), "initialized raw series file");
        Ok(())
    }

    fn ensure_writable(&self) -> anyhow::Result<()> {
        if !self.initialized {
            return Err(SeriesError::NotInitialized {
                path: self.path().to_string(),
            }
            .into());
        }
        if self.store.file.is_read_only() {
            return Err(SeriesError::ReadOnly {
                path: self.path().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn refresh(&mut self) -> anyhow::Result<u64> {
        if !self.initialized {
            return Ok(0);
        }

        let count = self.store.record_count()?;
        let (first, last) = (&mut self.first, &mut self.last);
        Ok(self.index.count(count, || {
            *first = None;
            *last = None;
        }))
    }

    fn after_write(&mut self) {
        self.index.invalidate();
        self.first = None;
        self.last = None;
    }

    fn lower_bound(&mut self, count: u64, key: T::Index) -> anyhow::Result<u64> {
        let store = &self.store;
        self.index
            .lower_bound(count, key, |position| store.key_at(position))
    }

    fn upper_bound(&mut self, count: u64, key: T::Index) -> anyhow::Result<u64> {
        let store = &self.store;
        self.index
            .upper_bound(count, key, |position| store.key_at(position))
    }

    /// read_range decodes the records in `start..end`.
    pub fn read_range(&mut self, start: u64, end: u64) -> anyhow::Result<Vec<T>> {
        let count = self.refresh()?;
        let end = end.min(count);
        let mut out = vec![];
        if start < end {
            self.store.read(start, (end - start) as usize, &mut out)?;
        }
        Ok(out)
    }

    fn segment_len(&self) -> u64 {
        self.options.segment_len.max(1) as u64
    }
}

impl<T: SeriesRecord> SegmentReader<T> for RawSeriesFile<T> {
    fn read_segment(&self, segment: u64, out: &mut Vec<T>) -> anyhow::Result<()> {
        let count = self.store.record_count()?;
        let start = segment * self.segment_len();
        let end = (start + self.segment_len()).min(count);
        if start < end {
            self.store.read(start, (end - start) as usize, out)?;
        }
        Ok(())
    }
}

impl<T: SeriesRecord> SeriesFile<T> for RawSeriesFile<T> {
    fn count(&mut self) -> anyhow::Result<u64> {
        self.refresh()
    }

    fn first_index(&mut self) -> anyhow::Result<Option<T::Index>> {
        let count = self.refresh()?;
        if count == 0 {
            return Ok(None);
        }
        if self.first.is_none() {
            let store = &self.store;
            let first = self
                .index
                .value_at(0, &mut |position| store.key_at(position))?;
            self.first = Some(first);
        }
        Ok(self.first)
    }

    fn last_index(&mut self) -> anyhow::Result<Option<T::Index>> {
        let count = self.refresh()?;
        if count == 0 {
            return Ok(None);
        }
        if self.last.is_none() {
            let store = &self.store;
            let last = self
                .index
                .value_at(count - 1, &mut |position| store.key_at(position))?;
            self.last = Some(last);
        }
        Ok(self.last)
    }

    fn append_data(&mut self, batches: &[&[T]], allow_truncation: bool) -> anyhow::Result<()> {
        self.ensure_writable()?;

        let total = validate_batches(batches, self.unique_indexes)?;
        let first = match first_key(batches) {
            Some(first) => first,
            None => return Ok(()),
        };

        let count = self.refresh()?;
        let position = match self.last_index()? {
            Some(last) if overlaps(first, last, self.unique_indexes) => {
                if !allow_truncation {
                    return Err(SeriesError::Overlap {
                        first: Box::new(first),
                        last: Box::new(last),
                    }
                    .into());
                }

                let cut = if self.unique_indexes {
                    self.lower_bound(count, first)?
                } else {
                    self.upper_bound(count, first)?
                };
                warn!(
                    path = self.path(),
                    discarded = count - cut,
                    ?first,
                    "append truncates existing records"
                );
                cut
            }
            _ => count,
        };

        let mut items = Vec::with_capacity(total);
        for batch in batches {
            items.extend_from_slice(batch);
        }
        self.store.replace_from(position, &items)?;
        self.after_write();

        debug!(path = self.path(), position, records = total, "append");
        Ok(())
    }

    fn truncate_file(&mut self, target: TruncateTarget<T::Index>) -> anyhow::Result<()> {
        self.ensure_writable()?;
        let count = self.refresh()?;

        let keep = match target {
            TruncateTarget::Count(n) => n,
            TruncateTarget::Index(key) => self.lower_bound(count, key)?,
        };
        if keep >= count {
            return Ok(());
        }

        self.store.replace_from(keep, &[])?;
        self.after_write();

        debug!(path = self.path(), records = keep, "truncate");
        Ok(())
    }

    fn stream_segments(
        &mut self,
        from: Option<T::Index>,
        reverse: bool,
        max_count: Option<usize>,
    ) -> anyhow::Result<Segments<'_, T>> {
        let count = self.refresh()?;
        if count == 0 || max_count == Some(0) {
            return Ok(Segments::empty());
        }

        let position = match (from, reverse) {
            (None, false) => Some(0),
            (None, true) => Some(count - 1),
            (Some(key), false) => Some(self.lower_bound(count, key)?),
            (Some(key), true) => self.upper_bound(count, key)?.checked_sub(1),
        };

        let segment_len = self.segment_len();
        let segments = (count + segment_len - 1) / segment_len;
        let start = position.map(|p| p / segment_len);
        Ok(Segments::new(&*self, start, segments, from, reverse, max_count))
    }

    fn stats(&mut self) -> anyhow::Result<SeriesStat<T::Index>> {
        let count = self.refresh()?;
        Ok(SeriesStat {
            path: self.path().to_string(),
            file_size: self.store.file.len()?,
            header_size: self.store.header_size,
            count,
            first_index: self.first_index()?,
            last_index: self.last_index()?,
            block_size: None,
            unique_indexes: self.unique_indexes,
        })
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.store.file.sync()?;
        Ok(())
    }
}
