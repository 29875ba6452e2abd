use std::io;
use std::sync::{Arc, RwLock};

use crate::{read_only_error, RandomAccessFile, StorageFile, WritableFile};

/// MemFile keeps the file content in memory. Clones share the same buffer, which
/// makes it possible to "reopen" a file in tests.
#[derive(Clone)]
pub struct MemFile {
    data: Arc<RwLock<Vec<u8>>>,
    name: String,
    read_only: bool,
}

impl MemFile {
    pub fn new(name: &str) -> Self {
        Self {
            data: Arc::new(RwLock::new(Vec::new())),
            name: name.to_string(),
            read_only: false,
        }
    }

    /// read_only returns a handle sharing the buffer that rejects writes.
    pub fn read_only(&self) -> Self {
        Self {
            data: self.data.clone(),
            name: self.name.clone(),
            read_only: true,
        }
    }

    /// to_vec returns a copy of the current content.
    pub fn to_vec(&self) -> Vec<u8> {
        match self.data.read() {
            Ok(data) => data.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_err() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "memory file lock poisoned")
    }
}

impl RandomAccessFile for MemFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.read().map_err(|_| Self::lock_err())?;

        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }

        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn len(&self) -> io::Result<u64> {
        let data = self.data.read().map_err(|_| Self::lock_err())?;
        Ok(data.len() as u64)
    }
}

impl WritableFile for MemFile {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if self.read_only {
            return Err(read_only_error(&self.name));
        }

        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        let offset = offset as usize;
        let upper = offset + buf.len();
        if upper > data.len() {
            data.resize(upper, 0);
        }
        data[offset..upper].copy_from_slice(buf);
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if self.read_only {
            return Err(read_only_error(&self.name));
        }

        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        data.resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageFile for MemFile {
    fn path(&self) -> &str {
        self.name.as_str()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
