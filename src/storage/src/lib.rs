//! Blocking I/O provider used by the series files.
//!
//! The core algorithms only see the traits below; `LocalFile`, `MmapReadableFile` and
//! `MemFile` are the concrete providers.

use std::io;
use std::io::ErrorKind;

pub mod file;
pub mod memory;
pub mod mmap;

pub use file::LocalFile;
pub use memory::MemFile;
pub use mmap::MmapReadableFile;

pub trait RandomAccessFile: Send + Sync {
    /// read_at reads up to `buf.len()` bytes at `offset`, returning the number of bytes read.
    /// Fewer bytes are only returned at the end of the file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// len returns the current length of the file in bytes.
    fn len(&self) -> io::Result<u64>;
}

pub trait RandomAccessFileExt: RandomAccessFile {
    /// read_exact_at fills `buf` completely or fails with `UnexpectedEof`.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.read_at(offset, buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("short read at offset {}", offset),
                ));
            }
            offset += n as u64;
            let tmp = buf;
            buf = &mut tmp[n..];
        }
        Ok(())
    }

    fn read_u8(&self, offset: u64) -> io::Result<u8> {
        let mut buf = [0; 1];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, offset: u64) -> io::Result<u16> {
        let mut buf = [0; 2];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32(&self, offset: u64) -> io::Result<u32> {
        let mut buf = [0; 4];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u64(&self, offset: u64) -> io::Result<u64> {
        let mut buf = [0; 8];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}

impl<R: RandomAccessFile + ?Sized> RandomAccessFileExt for R {}

pub trait WritableFile: Send {
    /// write_at writes all of `data` at `offset`, extending the file when needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// set_len truncates or extends the file to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// sync flushes written data to the durable medium.
    fn sync(&mut self) -> io::Result<()>;
}

/// StorageFile is a file a series file can live in.
pub trait StorageFile: RandomAccessFile + WritableFile {
    /// path returns the location of the file, or a descriptive name for non-disk files.
    fn path(&self) -> &str;

    fn is_read_only(&self) -> bool;
}

pub(crate) fn read_only_error(path: &str) -> io::Error {
    io::Error::new(
        ErrorKind::PermissionDenied,
        format!("file {} is opened read-only", path),
    )
}
