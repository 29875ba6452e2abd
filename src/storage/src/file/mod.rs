use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{read_only_error, RandomAccessFile, StorageFile, WritableFile};

/// LocalFile is a regular file on the local file system.
pub struct LocalFile {
    f: File,
    path: String,
    read_only: bool,
}

impl LocalFile {
    /// create creates a new file and fails if it already exists.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path.as_ref())?;

        Ok(Self {
            f,
            path: path.as_ref().to_string_lossy().to_string(),
            read_only: false,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;

        Ok(Self {
            f,
            path: path.as_ref().to_string_lossy().to_string(),
            read_only: false,
        })
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = File::open(path.as_ref())?;

        Ok(Self {
            f,
            path: path.as_ref().to_string_lossy().to_string(),
            read_only: true,
        })
    }
}

impl RandomAccessFile for LocalFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut f = &self.f;
        f.seek(SeekFrom::Start(offset))?;

        let mut n = 0;
        while n < buf.len() {
            match f.read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(len) => n += len,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.f.metadata()?.len())
    }
}

impl WritableFile for LocalFile {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        if self.read_only {
            return Err(read_only_error(&self.path));
        }

        self.f.seek(SeekFrom::Start(offset))?;
        self.f.write_all(data)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if self.read_only {
            return Err(read_only_error(&self.path));
        }

        self.f.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        if self.read_only {
            return Ok(());
        }

        self.f.flush()?;
        self.f.sync_all()
    }
}

impl StorageFile for LocalFile {
    fn path(&self) -> &str {
        self.path.as_str()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
