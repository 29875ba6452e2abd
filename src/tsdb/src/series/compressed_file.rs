//! CompressedSeriesFile stores records in blocks of `block_size` bytes behind a file
//! header. Block `i` starts at `header_size + i * block_size`, only the last block may be
//! shorter. The count of a compressed file is its number of blocks, binary searches run
//! over the first record of every block.
//!
//! Custom header: | format version(4B) | block size(4B) | unique(1B) | index field | layout |

use bytes::{Buf, BufMut};
use seriesdb_storage::{RandomAccessFile, RandomAccessFileExt, StorageFile, WritableFile};
use tracing::{debug, info, warn};

use crate::block::BlockCodec;
use crate::codec::raw::RawCodec;
use crate::codec::{CodecReader, CodecWriter};
use crate::error::SeriesError;
use crate::field::layout::FieldLayout;
use crate::field::{FieldNode, RecordFields, StructField};
use crate::options::SeriesOptions;
use crate::series::cached_index::CachedIndex;
use crate::series::header::{FileHeader, FileType};
use crate::series::stat::SeriesStat;
use crate::series::stream::{SegmentReader, Segments};
use crate::series::{
    first_key, is_cut, open_storage, overlaps, validate_batches, SeriesFile, SeriesRecord,
    TruncateTarget,
};

/// COMPRESSED_FORMAT_VERSION is the newest custom header version.
pub const COMPRESSED_FORMAT_VERSION: u32 = 1;

/// BlockStore addresses the blocks of the underlying file.
struct BlockStore {
    file: Box<dyn StorageFile>,
    header_size: u64,
    block_size: usize,
}

impl BlockStore {
    fn path(&self) -> &str {
        self.file.path()
    }

    fn offset(&self, block: u64) -> u64 {
        self.header_size + block * self.block_size as u64
    }

    fn block_count(&self) -> anyhow::Result<u64> {
        let len = self.file.len()?;
        let data = len.saturating_sub(self.header_size);
        let block_size = self.block_size as u64;
        Ok((data + block_size - 1) / block_size)
    }

    fn read_block(&self, block: u64) -> anyhow::Result<Vec<u8>> {
        let len = self.file.len()?;
        let offset = self.offset(block);
        if offset >= len {
            return Err(anyhow!(
                "block {} is beyond the end of {}",
                block,
                self.file.path()
            ));
        }

        let n = (len - offset).min(self.block_size as u64) as usize;
        let mut buf = vec![0_u8; n];
        self.file.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// first_key decodes the index of the first record of `block`.
    fn first_key<T: SeriesRecord>(
        &self,
        codec: &BlockCodec<T>,
        block: u64,
    ) -> anyhow::Result<T::Index> {
        let buf = self.read_block(block)?;
        Ok(codec.first_record(block, &buf)?.index())
    }

    fn decode<T: SeriesRecord>(
        &self,
        codec: &BlockCodec<T>,
        block: u64,
        out: &mut Vec<T>,
    ) -> anyhow::Result<usize> {
        let buf = self.read_block(block)?;
        codec.decode_block(block, &buf, usize::MAX, out)
    }

    /// replace_from writes `data` at the start of `block` and cuts the file right after it.
    fn replace_from(&mut self, block: u64, data: &[u8]) -> anyhow::Result<()> {
        let offset = self.offset(block);
        if !data.is_empty() {
            self.file.write_at(offset, data)?;
        }
        self.file.set_len(offset + data.len() as u64)?;
        Ok(())
    }
}

fn codec_of<'a, T>(
    codec: &'a Option<BlockCodec<T>>,
    path: &str,
) -> anyhow::Result<&'a BlockCodec<T>> {
    codec.as_ref().ok_or_else(|| {
        SeriesError::NotInitialized {
            path: path.to_string(),
        }
        .into()
    })
}

/// CompressedSeriesFile is a series file encoding records with a field codec tree.
///
/// A new file starts uninitialized: block size, uniqueness and the field tree may be
/// configured until `initialize_new_file` persists them. Opened files take all of them
/// from their header.
pub struct CompressedSeriesFile<T: SeriesRecord> {
    store: BlockStore,
    options: SeriesOptions,
    unique_indexes: bool,
    fields: StructField<T>,
    codec: Option<BlockCodec<T>>,
    index: CachedIndex<T::Index>,
    first: Option<T::Index>,
    last: Option<T::Index>,
}

impl<T: SeriesRecord> CompressedSeriesFile<T> {
    /// create creates a new empty file at `path`. It fails if the file exists.
    pub fn create(path: &str, options: SeriesOptions) -> anyhow::Result<Self> {
        let file = seriesdb_storage::LocalFile::create(path)?;
        Self::create_with(Box::new(file), options)
    }

    /// create_with prepares a new file in `file`, which must be empty.
    pub fn create_with(file: Box<dyn StorageFile>, options: SeriesOptions) -> anyhow::Result<Self> {
        if file.len()? != 0 {
            return Err(SeriesError::AlreadyInitialized {
                path: file.path().to_string(),
            }
            .into());
        }

        info!(path = file.path(), block_size = options.block_size, "create compressed series file");
        Ok(Self {
            store: BlockStore {
                file,
                header_size: 0,
                block_size: options.block_size,
            },
            unique_indexes: options.unique_indexes,
            fields: T::record_fields(),
            codec: None,
            index: CachedIndex::new(options.binary_search_cache_size),
            first: None,
            last: None,
            options,
        })
    }

    pub fn open(path: &str, options: SeriesOptions) -> anyhow::Result<Self> {
        let file = open_storage(path, false, false)?;
        Self::open_with(file, options, T::record_fields())
    }

    pub fn open_read_only(path: &str, options: SeriesOptions) -> anyhow::Result<Self> {
        let file = open_storage(path, true, options.use_mmap)?;
        Self::open_with(file, options, T::record_fields())
    }

    /// open_with opens an initialized file. The stored layout is applied to `fields`,
    /// which must have the shape the file was created with; custom codecs such as
    /// incremental fields have to be set up in `fields` already.
    pub fn open_with(
        file: Box<dyn StorageFile>,
        options: SeriesOptions,
        mut fields: StructField<T>,
    ) -> anyhow::Result<Self> {
        let path = file.path().to_string();
        let (header, header_size) = FileHeader::read_from(file.as_ref(), &path)?;
        let raw = RawCodec::<T>::new()?;
        header.validate(&path, FileType::Compressed, raw.item_size(), raw.signature())?;

        let custom = CompressedHeader::from_bytes(&header.custom)
            .map_err(|e| SeriesError::format(&path, format!("corrupt custom header: {}", e)))?;
        if custom.version > COMPRESSED_FORMAT_VERSION {
            return Err(SeriesError::format(
                &path,
                format!("unsupported format version {}", custom.version),
            )
            .into());
        }
        if custom.index_field != T::INDEX_FIELD {
            return Err(SeriesError::format(
                &path,
                format!(
                    "file is indexed by {}, not by {}",
                    custom.index_field,
                    T::INDEX_FIELD
                ),
            )
            .into());
        }

        fields
            .restore(&custom.layout)
            .map_err(|e| SeriesError::format(&path, format!("field layout mismatch: {}", e)))?;
        let codec = BlockCodec::new(
            Box::new(fields.clone()),
            custom.block_size,
            options.validate_blocks,
        )?;

        info!(
            path = path.as_str(),
            block_size = custom.block_size,
            unique = custom.unique_indexes,
            read_only = file.is_read_only(),
            "open compressed series file"
        );
        Ok(Self {
            store: BlockStore {
                file,
                header_size,
                block_size: custom.block_size,
            },
            unique_indexes: custom.unique_indexes,
            fields,
            codec: Some(codec),
            index: CachedIndex::new(options.binary_search_cache_size),
            first: None,
            last: None,
            options,
        })
    }

    pub fn path(&self) -> &str {
        self.store.path()
    }

    pub fn is_initialized(&self) -> bool {
        self.codec.is_some()
    }

    pub fn block_size(&self) -> usize {
        self.store.block_size
    }

    pub fn unique_indexes(&self) -> bool {
        self.unique_indexes
    }

    pub fn options(&self) -> &SeriesOptions {
        &self.options
    }

    fn ensure_uninitialized(&self) -> anyhow::Result<()> {
        if self.is_initialized() {
            return Err(SeriesError::AlreadyInitialized {
                path: self.path().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn ensure_writable(&self) -> anyhow::Result<()> {
        if !self.is_initialized() {
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

    pub fn set_block_size(&mut self, block_size: usize) -> anyhow::Result<()> {
        self.ensure_uninitialized()?;
        if block_size > i32::MAX as usize {
            return Err(anyhow!("block size {} exceeds {}", block_size, i32::MAX));
        }
        self.store.block_size = block_size;
        Ok(())
    }

    pub fn set_unique_indexes(&mut self, unique_indexes: bool) -> anyhow::Result<()> {
        self.ensure_uninitialized()?;
        self.unique_indexes = unique_indexes;
        Ok(())
    }

    /// field_mut returns the codec node at `path`, e.g. `price` or `quote.bid`.
    pub fn field_mut(&mut self, path: &str) -> anyhow::Result<&mut dyn FieldNode> {
        self.ensure_uninitialized()?;
        let type_name = self.fields.type_name().to_string();
        self.fields
            .member_mut(path)
            .ok_or_else(|| SeriesError::serializer(&type_name, format!("no field {}", path)).into())
    }

    /// fields_mut gives access to the whole codec tree, e.g. to replace a member codec.
    pub fn fields_mut(&mut self) -> anyhow::Result<&mut StructField<T>> {
        self.ensure_uninitialized()?;
        Ok(&mut self.fields)
    }

    pub fn fields(&self) -> &StructField<T> {
        &self.fields
    }

    /// set_binary_search_cache_size resizes the cache, 0 selects the default size and a
    /// negative size disables it.
    pub fn set_binary_search_cache_size(&mut self, size: i32) {
        self.options.binary_search_cache_size = size;
        self.index.set_max_size(size);
    }

    /// initialize_new_file validates the configuration and writes the header. It may only
    /// run once.
    pub fn initialize_new_file(&mut self) -> anyhow::Result<()> {
        self.ensure_uninitialized()?;

        if !self.fields.member_names().contains(&T::INDEX_FIELD) {
            return Err(SeriesError::serializer(
                self.fields.type_name(),
                format!("index field {} is not a member", T::INDEX_FIELD),
            )
            .into());
        }
        let codec = BlockCodec::new(
            Box::new(self.fields.clone()),
            self.store.block_size,
            self.options.validate_blocks,
        )?;
        let raw = RawCodec::<T>::new()?;

        let custom = CompressedHeader {
            version: COMPRESSED_FORMAT_VERSION,
            block_size: self.store.block_size,
            unique_indexes: self.unique_indexes,
            index_field: T::INDEX_FIELD.to_string(),
            layout: self.fields.layout(),
        };
        let mut header = FileHeader::new(
            &self.options.tag,
            FileType::Compressed,
            raw.item_size(),
            raw.signature(),
        );
        header.custom = custom.to_bytes();

        let b = header.to_bytes();
        self.store.file.write_at(0, &b)?;
        self.store.file.set_len(b.len() as u64)?;
        self.store.header_size = b.len() as u64;
        self.codec = Some(codec);
        self.index.invalidate();

        info!(
            path = self.path(),
            header_size = b.len(),
            max_record_size = self.fields.max_encoded_size(),
            "initialized compressed series file"
        );
        Ok(())
    }

    /// refresh observes the current block count, dropping cached bounds when it changed.
    fn refresh(&mut self) -> anyhow::Result<u64> {
        if !self.is_initialized() {
            return Ok(0);
        }

        let count = self.store.block_count()?;
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

    /// search_block returns the first block whose first index is not less than `key`,
    /// or greater than `key` if `upper` is set.
    fn search_block(&mut self, count: u64, key: T::Index, upper: bool) -> anyhow::Result<u64> {
        let codec = codec_of(&self.codec, self.store.path())?;
        let store = &self.store;
        let lookup = |block: u64| store.first_key(codec, block);
        if upper {
            self.index.upper_bound(count, key, lookup)
        } else {
            self.index.lower_bound(count, key, lookup)
        }
    }

    /// read_block decodes every record of `block`.
    pub fn read_block(&self, block: u64) -> anyhow::Result<Vec<T>> {
        let codec = codec_of(&self.codec, self.store.path())?;
        let mut out = vec![];
        self.store.decode(codec, block, &mut out)?;
        Ok(out)
    }

    /// verify decodes every block with checksum validation and returns the record count.
    pub fn verify(&mut self) -> anyhow::Result<u64> {
        let count = self.refresh()?;
        let codec = codec_of(&self.codec, self.store.path())?;
        let strict = BlockCodec::new(Box::new(self.fields.clone()), codec.block_size(), true)?;

        let mut records = 0;
        let mut out = vec![];
        for block in 0..count {
            out.clear();
            records += self.store.decode(&strict, block, &mut out)? as u64;
        }
        Ok(records)
    }
}

impl<T: SeriesRecord> SegmentReader<T> for CompressedSeriesFile<T> {
    fn read_segment(&self, segment: u64, out: &mut Vec<T>) -> anyhow::Result<()> {
        let codec = codec_of(&self.codec, self.store.path())?;
        self.store.decode(codec, segment, out)?;
        Ok(())
    }
}

impl<T: SeriesRecord> SeriesFile<T> for CompressedSeriesFile<T> {
    fn count(&mut self) -> anyhow::Result<u64> {
        self.refresh()
    }

    fn first_index(&mut self) -> anyhow::Result<Option<T::Index>> {
        let count = self.refresh()?;
        if count == 0 {
            return Ok(None);
        }
        if self.first.is_none() {
            let codec = codec_of(&self.codec, self.store.path())?;
            let store = &self.store;
            let first = self
                .index
                .value_at(0, &mut |block| store.first_key(codec, block))?;
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
            let last = self.read_block(count - 1)?;
            self.last = last.last().map(|r| r.index());
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
        let unique = self.unique_indexes;
        let (rewind, mut merged) = match self.last_index()? {
            None => (0, Vec::with_capacity(total)),
            Some(last) if overlaps(first, last, unique) => {
                if !allow_truncation {
                    return Err(SeriesError::Overlap {
                        first: Box::new(first),
                        last: Box::new(last),
                    }
                    .into());
                }

                let cut = self.search_block(count, first, !unique)?;
                if cut == 0 {
                    warn!(path = self.path(), blocks = count, ?first, "append replaces all data");
                    (0, Vec::with_capacity(total))
                } else {
                    let rewind = cut - 1;
                    let mut prefix = self.read_block(rewind)?;
                    let keep = prefix.partition_point(|r| !is_cut(r.index(), first, unique));
                    warn!(
                        path = self.path(),
                        blocks = count - rewind,
                        kept = keep,
                        ?first,
                        "append truncates existing data"
                    );
                    prefix.truncate(keep);
                    (rewind, prefix)
                }
            }
            Some(_) => {
                let rewind = count - 1;
                let block = self.store.read_block(rewind)?;
                if block.len() < self.store.block_size {
                    // the partial tail block is rewritten together with the new data
                    (rewind, self.read_block(rewind)?)
                } else {
                    (count, Vec::with_capacity(total))
                }
            }
        };

        // the new data continues the record stored right before the rewritten blocks
        let prev = if merged.is_empty() && rewind > 0 {
            self.read_block(rewind - 1)?.pop()
        } else {
            None
        };

        let prefix_len = merged.len();
        for batch in batches {
            merged.extend_from_slice(batch);
        }

        let codec = codec_of(&self.codec, self.store.path())?;
        let mut buf = Vec::with_capacity(self.store.block_size);
        let blocks = codec.encode_blocks(prev.as_ref(), &merged, &mut buf)?;

        self.store.replace_from(rewind, &buf)?;
        self.after_write();

        debug!(
            path = self.path(),
            rewind,
            prefix = prefix_len,
            records = total,
            blocks,
            bytes = buf.len(),
            "append"
        );
        Ok(())
    }

    fn truncate_file(&mut self, target: TruncateTarget<T::Index>) -> anyhow::Result<()> {
        self.ensure_writable()?;
        let count = self.refresh()?;

        match target {
            TruncateTarget::Count(n) => {
                if n >= count {
                    return Ok(());
                }
                self.store.replace_from(n, &[])?;
                debug!(path = self.path(), blocks = n, "truncate to block count");
            }
            TruncateTarget::Index(key) => {
                let cut = self.search_block(count, key, false)?;
                if cut == 0 {
                    self.store.replace_from(0, &[])?;
                } else {
                    let rewind = cut - 1;
                    let mut records = self.read_block(rewind)?;
                    let keep = records.partition_point(|r| r.index() < key);
                    if keep == records.len() {
                        if cut < count {
                            self.store.replace_from(cut, &[])?;
                        }
                    } else {
                        records.truncate(keep);
                        let codec = codec_of(&self.codec, self.store.path())?;
                        let mut buf = vec![];
                        codec.encode_blocks(None, &records, &mut buf)?;
                        self.store.replace_from(rewind, &buf)?;
                    }
                }
                debug!(path = self.path(), ?key, "truncate to index");
            }
        }

        self.after_write();
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

        let start = match (from, reverse) {
            (None, false) => Some(0),
            (None, true) => Some(count - 1),
            (Some(key), false) => Some(self.search_block(count, key, false)?.saturating_sub(1)),
            (Some(key), true) => self.search_block(count, key, true)?.checked_sub(1),
        };

        Ok(Segments::new(&*self, start, count, from, reverse, max_count))
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
            block_size: Some(self.store.block_size),
            unique_indexes: self.unique_indexes,
        })
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.store.file.sync()?;
        Ok(())
    }
}

/// CompressedHeader is the compressed file specific part of the file header.
#[derive(Debug, Clone, PartialEq)]
struct CompressedHeader {
    version: u32,
    block_size: usize,
    unique_indexes: bool,
    index_field: String,
    layout: FieldLayout,
}

impl CompressedHeader {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.put_u32_le(self.version);
        buf.put_i32_le(self.block_size as i32);
        buf.put_u8(self.unique_indexes as u8);

        let layout = self.layout.to_bytes();
        let mut w = CodecWriter::new(&mut buf);
        w.write_str(self.index_field.as_str());
        w.write_var_u64(layout.len() as u64);
        w.write_bytes(layout.as_slice());
        buf
    }

    fn from_bytes(b: &[u8]) -> anyhow::Result<Self> {
        let mut r = CodecReader::new(b);
        let mut fixed = r.read_bytes(4 + 4 + 1)?;
        let version = fixed.get_u32_le();
        let block_size = fixed.get_i32_le();
        if block_size <= 0 {
            return Err(anyhow!("invalid block size {}", block_size));
        }
        let unique_indexes = match fixed.get_u8() {
            0 => false,
            1 => true,
            v => return Err(anyhow!("invalid unique flag {}", v)),
        };

        let index_field = r.read_str()?.to_string();
        let layout_len = r.read_var_u64()? as usize;
        let layout = FieldLayout::from_bytes(r.read_bytes(layout_len)?)?;

        Ok(Self {
            version,
            block_size: block_size as usize,
            unique_indexes,
            index_field,
            layout,
        })
    }
}
