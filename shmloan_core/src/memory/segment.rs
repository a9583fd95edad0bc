// Named shared memory segments backed by files under the shmloan base dir
use crate::error::{LoanError, LoanResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::AtomicU8;

/// One named cross-process shared memory region.
///
/// Dropping a segment only unmaps this process's view; the named OS object
/// stays alive until [`ShmSegment::unlink`] removes it.
#[derive(Debug)]
pub struct ShmSegment {
    mmap: MmapMut,
    size: usize,
    path: PathBuf,
    _file: File,
    name: String,
}

impl ShmSegment {
    /// Create a brand new segment of `size` bytes, zero-filled.
    ///
    /// A name collision (the backing file already exists) is an error:
    /// segment names derive from random ids and are never reused.
    pub fn create(name: &str, size: usize) -> LoanResult<Self> {
        let dir = super::platform::shm_buffers_dir();
        std::fs::create_dir_all(&dir).map_err(|e| LoanError::allocation(name, e))?;

        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LoanError::allocation(name, e))?;

        file.set_len(size as u64)
            .map_err(|e| LoanError::allocation(name, e))?;

        let mut mmap = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(|e| LoanError::allocation(name, e))?
        };
        mmap.fill(0);

        log::debug!("created shared memory segment '{}' ({} bytes)", name, size);

        Ok(Self {
            mmap,
            size,
            path,
            _file: file,
            name: name.to_string(),
        })
    }

    /// Open an existing segment by name, expecting exactly `size` bytes.
    ///
    /// Returns [`LoanError::NotFound`] if the named segment does not exist
    /// (the creator already destroyed it, or the name is stale).
    pub fn open(name: &str, size: usize) -> LoanResult<Self> {
        let path = super::platform::shm_buffers_dir().join(name);
        if !path.exists() {
            return Err(LoanError::not_found(name));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| LoanError::allocation(name, e))?;

        let metadata = file.metadata().map_err(|e| LoanError::allocation(name, e))?;
        if (metadata.len() as usize) < size {
            return Err(LoanError::allocation(
                name,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("segment is {} bytes, expected {}", metadata.len(), size),
                ),
            ));
        }

        let mmap = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(|e| LoanError::allocation(name, e))?
        };

        log::debug!("opened shared memory segment '{}' ({} bytes)", name, size);

        Ok(Self {
            mmap,
            size,
            path,
            _file: file,
            name: name.to_string(),
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the named OS object. Best-effort: failures are logged so a
    /// teardown path never unwinds and leaks the paired segment.
    pub fn unlink(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to unlink shared memory segment '{}': {}", self.name, e);
            }
        }
    }

    /// View the first byte of the segment as an atomic cell. Every segment
    /// is at least one byte, so this is always in bounds.
    pub(crate) fn flag_cell(&self) -> &AtomicU8 {
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU8) }
    }
}

/// Deterministic data/flag segment naming and paired allocation.
///
/// Every logical buffer owns exactly two segments: the payload and a
/// single-byte release flag. Both names derive from the buffer id alone, so
/// a receiving process can re-open the pair without any side channel.
pub struct SegmentPair;

const DATA_PREFIX: &str = "shared_";
const FLAG_PREFIX: &str = "flag_";

impl SegmentPair {
    pub fn data_name(id: &str) -> String {
        format!("{}{}", DATA_PREFIX, id)
    }

    pub fn flag_name(id: &str) -> String {
        format!("{}{}", FLAG_PREFIX, id)
    }

    fn data_size(len: usize, elem_size: usize) -> LoanResult<usize> {
        if len == 0 {
            return Err(LoanError::protocol("cannot allocate a zero-length buffer"));
        }
        len.checked_mul(elem_size)
            .filter(|&bytes| bytes > 0)
            .ok_or_else(|| {
                LoanError::protocol(format!(
                    "buffer size overflows: {} elements of {} bytes",
                    len, elem_size
                ))
            })
    }

    /// Allocate a fresh data/flag pair. The flag starts `true`: no hand-off
    /// has happened yet, so a sole owner may free at will.
    pub fn create(id: &str, len: usize, elem_size: usize) -> LoanResult<(ShmSegment, ShmSegment)> {
        let bytes = Self::data_size(len, elem_size)?;
        let data = ShmSegment::create(&Self::data_name(id), bytes)?;
        let flag = match ShmSegment::create(&Self::flag_name(id), 1) {
            Ok(flag) => flag,
            Err(e) => {
                // Don't leave the data segment orphaned.
                data.unlink();
                return Err(e);
            }
        };
        flag.flag_cell()
            .store(1, std::sync::atomic::Ordering::Release);
        Ok((data, flag))
    }

    /// Open both existing segments of a transferred buffer.
    pub fn open(id: &str, len: usize, elem_size: usize) -> LoanResult<(ShmSegment, ShmSegment)> {
        let bytes = Self::data_size(len, elem_size)?;
        let data = ShmSegment::open(&Self::data_name(id), bytes)?;
        let flag = ShmSegment::open(&Self::flag_name(id), 1)?;
        Ok((data, flag))
    }
}
