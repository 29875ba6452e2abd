use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::{read_only_error, RandomAccessFile, StorageFile, WritableFile};

/// MmapReadableFile maps a file read-only. The mapping covers the file length at
/// open time; readers reopen the file to observe growth.
pub struct MmapReadableFile {
    _f: File,
    path: String,
    mmap: Option<Mmap>,
}

impl MmapReadableFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = File::open(path.as_ref())?;

        let meta = f.metadata()?;
        let len = meta.len() as usize;

        // an empty file can not be mapped
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { MmapOptions::new().offset(0).len(len).map(&f)? })
        };

        Ok(Self {
            _f: f,
            path: path.as_ref().to_string_lossy().to_string(),
            mmap,
        })
    }

    fn data(&self) -> &[u8] {
        match &self.mmap {
            Some(mmap) => &mmap[..],
            None => &[],
        }
    }
}

impl RandomAccessFile for MmapReadableFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data();

        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }

        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data().len() as u64)
    }
}

impl WritableFile for MmapReadableFile {
    fn write_at(&mut self, _offset: u64, _data: &[u8]) -> io::Result<()> {
        Err(read_only_error(&self.path))
    }

    fn set_len(&mut self, _len: u64) -> io::Result<()> {
        Err(read_only_error(&self.path))
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageFile for MmapReadableFile {
    fn path(&self) -> &str {
        self.path.as_str()
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io;
    use std::io::Write;

    use crate::mmap::MmapReadableFile;
    use crate::{RandomAccessFile, RandomAccessFileExt};

    #[test]
    fn test_mmap_readable_file() -> io::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let tsm_file = dir.as_ref().join("mmap_test");

        let data = "0123456789".as_bytes();
        let len = {
            let mut f = File::create(&tsm_file)?;
            f.write_all(data)?;
            f.sync_all()?;
            data.len()
        };

        let accessor = MmapReadableFile::open(&tsm_file)?;
        assert_eq!(accessor.len()?, len as u64);

        let mut buf = vec![0_u8; len];
        accessor.read_exact_at(0, &mut buf[..])?;
        assert_eq!(buf.as_slice(), data);

        let mut tail = [0_u8; 4];
        assert_eq!(accessor.read_at(8, &mut tail)?, 2);

        Ok(())
    }

    #[test]
    fn test_mmap_empty_file() -> io::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.as_ref().join("mmap_empty");
        File::create(&path)?;

        let accessor = MmapReadableFile::open(&path)?;
        assert_eq!(accessor.len()?, 0);
        assert_eq!(accessor.read_at(0, &mut [0_u8; 1])?, 0);

        Ok(())
    }
}
