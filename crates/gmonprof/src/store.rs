use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::StoreError;

/// Byte-addressable storage the profile is persisted to.
///
/// Models a flash partition: it is erased once before a session starts and
/// then written at explicit offsets.
pub trait PersistentStore {
    /// Reset the whole store to its erased state.
    fn erase(&mut self) -> Result<(), StoreError>;

    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError>;

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Number of bytes that can currently be read back.
    fn size(&self) -> Result<usize, StoreError>;
}

impl<S: PersistentStore + ?Sized> PersistentStore for &mut S {
    fn erase(&mut self) -> Result<(), StoreError> {
        (**self).erase()
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).write_at(offset, bytes)
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> Result<usize, StoreError> {
        (**self).size()
    }
}

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xff;

/// A store held in memory.
///
/// With a capacity it behaves like a fixed-size partition and rejects
/// accesses beyond its end; without one it grows as written.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![ERASED_BYTE; capacity],
            capacity: Some(capacity),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            capacity: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), StoreError> {
        if let Some(capacity) = self.capacity {
            if offset.checked_add(len).map_or(true, |end| end > capacity) {
                return Err(StoreError::OutOfBounds {
                    offset,
                    len,
                    capacity,
                });
            }
        }
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn erase(&mut self) -> Result<(), StoreError> {
        match self.capacity {
            Some(_) => self.bytes.fill(ERASED_BYTE),
            None => self.bytes.clear(),
        }
        Ok(())
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_bounds(offset, bytes.len())?;
        let end = offset + bytes.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, ERASED_BYTE);
        }
        self.bytes[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let capacity = self.bytes.len();
        let src = offset
            .checked_add(buf.len())
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(StoreError::OutOfBounds {
                offset,
                len: buf.len(),
                capacity,
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn size(&self) -> Result<usize, StoreError> {
        Ok(self.bytes.len())
    }
}

/// A store backed by a file, e.g. a dumped partition image.
#[derive(Debug)]
pub struct FileStore {
    file: File,
}

impl FileStore {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self {
            file: File::open(path)?,
        })
    }
}

impl PersistentStore for FileStore {
    fn erase(&mut self) -> Result<(), StoreError> {
        self.file.set_len(0)?;
        Ok(())
    }

    fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn size(&self) -> Result<usize, StoreError> {
        let len = self.file.metadata()?.len();
        usize::try_from(len).map_err(|_| {
            StoreError::Io(std::io::Error::other(format!(
                "store of {} bytes is not addressable",
                len
            )))
        })
    }
}
