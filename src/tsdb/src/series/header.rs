use bytes::{Buf, BufMut};
use seriesdb_storage::{RandomAccessFile, RandomAccessFileExt};

use crate::codec::{CodecReader, CodecWriter};
use crate::error::SeriesError;

/// MAGIC is written as the first 4 bytes of every series file.
pub(crate) const MAGIC: &[u8; 4] = b"TSDF";

/// HEADER_VERSION is the version of the generic header layout.
pub(crate) const HEADER_VERSION: u8 = 1;

/// Fixed header prefix: | magic(4B) | header version(1B) | header size(4B) |
const HEADER_PREFIX_SIZE: usize = 4 + 1 + 4;

/// upper bound of a sane header, guards against reading garbage as a size
const MAX_HEADER_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Raw,
    Compressed,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Compressed => "compressed",
        }
    }
}

/// FileHeader is the header shared by raw and compressed series files:
///
/// | magic | version | header size | tag | file type | item size | signature | custom |
///
/// The header size covers the whole header, so data starts right after it.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub tag: String,
    pub file_type: String,
    pub item_size: u32,
    pub signature: String,
    /// file type specific part of the header
    pub custom: Vec<u8>,
}

impl FileHeader {
    pub fn new(tag: &str, file_type: FileType, item_size: usize, signature: &str) -> Self {
        Self {
            tag: tag.to_string(),
            file_type: file_type.as_str().to_string(),
            item_size: item_size as u32,
            signature: signature.to_string(),
            custom: vec![],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64 + self.custom.len());
        {
            let mut w = CodecWriter::new(&mut body);
            w.write_str(self.tag.as_str());
            w.write_str(self.file_type.as_str());
        }
        body.put_u32_le(self.item_size);
        {
            let mut w = CodecWriter::new(&mut body);
            w.write_str(self.signature.as_str());
            w.write_var_u64(self.custom.len() as u64);
            w.write_bytes(self.custom.as_slice());
        }

        let mut buf = Vec::with_capacity(HEADER_PREFIX_SIZE + body.len());
        buf.put_slice(MAGIC);
        buf.put_u8(HEADER_VERSION);
        buf.put_u32_le((HEADER_PREFIX_SIZE + body.len()) as u32);
        buf.put_slice(body.as_slice());
        buf
    }

    /// read_from reads the header at the start of `file` and returns it with its size.
    pub fn read_from<F>(file: &F, path: &str) -> anyhow::Result<(Self, u64)>
    where
        F: RandomAccessFile + ?Sized,
    {
        let len = file.len()?;
        if len < HEADER_PREFIX_SIZE as u64 {
            return Err(
                SeriesError::format(path, format!("file of {} bytes has no header", len)).into(),
            );
        }

        let mut prefix = [0_u8; HEADER_PREFIX_SIZE];
        file.read_exact_at(0, &mut prefix)?;
        let mut b = &prefix[..];

        let magic = b.copy_to_bytes(4);
        if magic.as_ref() != MAGIC {
            return Err(SeriesError::format(path, format!("bad magic {:?}", magic)).into());
        }
        let version = b.get_u8();
        if version > HEADER_VERSION {
            return Err(SeriesError::format(
                path,
                format!("unsupported header version {}", version),
            )
            .into());
        }
        let size = b.get_u32_le();
        if size < HEADER_PREFIX_SIZE as u32 || size > MAX_HEADER_SIZE || size as u64 > len {
            return Err(SeriesError::format(path, format!("bad header size {}", size)).into());
        }

        let mut body = vec![0_u8; size as usize - HEADER_PREFIX_SIZE];
        file.read_exact_at(HEADER_PREFIX_SIZE as u64, &mut body)?;
        let header = Self::parse_body(body.as_slice())
            .map_err(|e| SeriesError::format(path, format!("corrupt header: {}", e)))?;

        Ok((header, size as u64))
    }

    fn parse_body(b: &[u8]) -> anyhow::Result<Self> {
        let mut r = CodecReader::new(b);
        let tag = r.read_str()?.to_string();
        let file_type = r.read_str()?.to_string();
        let mut item_size = r.read_bytes(4)?;
        let item_size = item_size.get_u32_le();
        let signature = r.read_str()?.to_string();
        let custom_len = r.read_var_u64()? as usize;
        let custom = r.read_bytes(custom_len)?.to_vec();
        if !r.is_empty() {
            return Err(anyhow!("{} unexpected trailing bytes", r.remaining()));
        }

        Ok(Self {
            tag,
            file_type,
            item_size,
            signature,
            custom,
        })
    }

    /// validate checks that the file was written for `file_type` records of the given shape.
    pub fn validate(
        &self,
        path: &str,
        file_type: FileType,
        item_size: usize,
        signature: &str,
    ) -> anyhow::Result<()> {
        if self.file_type != file_type.as_str() {
            return Err(SeriesError::format(
                path,
                format!("expected a {} file, found {}", file_type.as_str(), self.file_type),
            )
            .into());
        }
        if self.item_size as usize != item_size {
            return Err(SeriesError::format(
                path,
                format!("item size changed from {} to {}", self.item_size, item_size),
            )
            .into());
        }
        if self.signature != signature {
            return Err(SeriesError::format(
                path,
                format!("record type {} does not match stored {}", signature, self.signature),
            )
            .into());
        }
        Ok(())
    }
}
