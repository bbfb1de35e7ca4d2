// SPDX-License-Identifier: Apache-2.0
// Copyright Fabricd Authors

//! Byte-level access to a switch register file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::GasError;

/// Shared handle to an [`AccessInterface`].
pub type SharedInterface = Arc<dyn AccessInterface>;

/// Bounds-checked byte access to a register file.
///
/// Implementations must be safe to call from multiple threads; callers that
/// need a multi-access critical section (such as the MRPC submit/poll/read
/// cycle) serialize on their own mutex on top of this.
pub trait AccessInterface: Send + Sync {
    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), GasError>;

    /// Writes `data` starting at `offset`.
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), GasError>;

    /// Total size of the register file in bytes.
    fn size(&self) -> usize;
}

/// A register file memory-mapped from a device memory path
/// (typically the switch's PCI `resource0`).
pub struct MemoryMappedFile {
    map: Mutex<MmapMut>,
    size: usize,
}

impl MemoryMappedFile {
    /// Opens and maps the device memory file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GasError::Map`] if the file cannot be opened or mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GasError> {
        let path = path.as_ref();
        let map_err = |source| GasError::Map {
            path: path.display().to_string(),
            source,
        };
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(map_err)?;
        // SAFETY: the mapping is private to this handle and the device file
        // is not truncated while mapped.
        #[allow(unsafe_code)]
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(map_err)?;
        let size = map.len();
        Ok(MemoryMappedFile {
            map: Mutex::new(map),
            size,
        })
    }
}

impl AccessInterface for MemoryMappedFile {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), GasError> {
        let map = self.map.lock();
        let end = checked_end(offset, buf.len(), self.size)?;
        buf.copy_from_slice(&map[offset..end]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), GasError> {
        let mut map = self.map.lock();
        let end = checked_end(offset, data.len(), self.size)?;
        map[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// An in-memory register file. Used by tests and simulators.
pub struct InMemoryRegisterFile {
    bytes: Mutex<Vec<u8>>,
}

impl InMemoryRegisterFile {
    /// Creates a zeroed register file of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        InMemoryRegisterFile {
            bytes: Mutex::new(vec![0; size]),
        }
    }

    /// Overwrites bytes at `offset` without going through bounds errors;
    /// panics on overflow. Test setup convenience.
    pub fn preload(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Snapshot of bytes at `offset`.
    #[must_use]
    pub fn snapshot(&self, offset: usize, len: usize) -> Vec<u8> {
        let bytes = self.bytes.lock();
        bytes[offset..offset + len].to_vec()
    }
}

impl AccessInterface for InMemoryRegisterFile {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), GasError> {
        let bytes = self.bytes.lock();
        let end = checked_end(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[offset..end]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), GasError> {
        let mut bytes = self.bytes.lock();
        let end = checked_end(offset, data.len(), bytes.len())?;
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn size(&self) -> usize {
        self.bytes.lock().len()
    }
}

fn checked_end(offset: usize, len: usize, size: usize) -> Result<usize, GasError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(end),
        _ => Err(GasError::OutOfBounds { offset, len, size }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn in_memory_read_write_round_trip() {
        let file = InMemoryRegisterFile::new(64);
        file.write(10, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        file.read(10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let file = InMemoryRegisterFile::new(16);
        let mut buf = [0u8; 4];
        assert!(matches!(
            file.read(14, &mut buf),
            Err(GasError::OutOfBounds { offset: 14, len: 4, size: 16 })
        ));
        assert!(file.write(usize::MAX, &[0]).is_err());
    }

    #[test]
    fn mapped_file_reads_what_was_on_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xabu8; 128]).unwrap();
        tmp.flush().unwrap();

        let file = MemoryMappedFile::open(tmp.path()).unwrap();
        assert_eq!(file.size(), 128);
        let mut buf = [0u8; 2];
        file.read(100, &mut buf).unwrap();
        assert_eq!(buf, [0xab, 0xab]);

        file.write(0, &[1, 2]).unwrap();
        file.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
    }

    #[test]
    fn missing_register_file_fails_to_open() {
        assert!(matches!(
            MemoryMappedFile::open("/nonexistent/resource0"),
            Err(GasError::Map { .. })
        ));
    }
}
