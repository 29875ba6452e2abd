/// DEFAULT_BLOCK_SIZE is the block size of new compressed files.
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

/// DEFAULT_BINARY_SEARCH_CACHE_SIZE is the number of cached index lookups used when
/// `binary_search_cache_size` is 0.
pub const DEFAULT_BINARY_SEARCH_CACHE_SIZE: usize = 128;

/// DEFAULT_SEGMENT_LEN is the number of records a raw file yields per streamed segment.
pub const DEFAULT_SEGMENT_LEN: usize = 1024;

/// SeriesOptions configures how a series file is created or opened.
///
/// `block_size` and `unique_indexes` only matter for new files, existing files use
/// the values stored in their header.
#[derive(Debug, Clone)]
pub struct SeriesOptions {
    pub block_size: usize,
    pub unique_indexes: bool,
    /// 0 selects the default size, a negative value disables the cache.
    pub binary_search_cache_size: i32,
    /// verify the checksum of every decoded block
    pub validate_blocks: bool,
    pub segment_len: usize,
    pub tag: String,
    /// map read-only files into memory instead of reading through the file handle
    pub use_mmap: bool,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            unique_indexes: true,
            binary_search_cache_size: 0,
            validate_blocks: false,
            segment_len: DEFAULT_SEGMENT_LEN,
            tag: String::new(),
            use_mmap: false,
        }
    }
}

impl SeriesOptions {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_unique_indexes(mut self, unique_indexes: bool) -> Self {
        self.unique_indexes = unique_indexes;
        self
    }

    pub fn with_binary_search_cache_size(mut self, size: i32) -> Self {
        self.binary_search_cache_size = size;
        self
    }

    pub fn with_validate_blocks(mut self, validate: bool) -> Self {
        self.validate_blocks = validate;
        self
    }

    pub fn with_segment_len(mut self, segment_len: usize) -> Self {
        self.segment_len = segment_len;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }
}
