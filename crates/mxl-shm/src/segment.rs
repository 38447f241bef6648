//! File-backed typed shared-memory segments.
//!
//! A [`Segment<T>`] maps a file whose first `size_of::<T>()` bytes are the
//! header and whose remainder is an opaque payload region. The same file can
//! be mapped by any number of processes; coordination between them is the
//! caller's problem (see the commit protocol in `writer`/`reader`).

use std::fs::OpenOptions;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use mxl_core::{Error, Result};

/// How a segment (or a whole flow) is attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Create the backing file; fails if it already exists.
    CreateReadWrite,
    /// Map an existing file read-write.
    OpenReadWrite,
    /// Map an existing file read-only.
    OpenReadOnly,
}

enum Backing {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl Backing {
    fn as_ptr(&self) -> *const u8 {
        match self {
            Backing::ReadWrite(m) => m.as_ptr(),
            Backing::ReadOnly(m) => m.as_ptr(),
        }
    }
}

/// A typed, file-backed memory mapping: one `T` header plus a payload region.
///
/// The mapping is unmapped when the last owner drops the segment. Header and
/// payload accessors hand out references into memory that other processes
/// mutate concurrently; all post-creation mutation of header fields goes
/// through the atomics embedded in `T`.
pub struct Segment<T> {
    backing: Backing,
    len: usize,
    path: PathBuf,
    _marker: PhantomData<T>,
}

// SAFETY: the mapping is plain shared memory; `T` headers are repr(C) data
// whose mutable fields are atomics, and payload access is coordinated by the
// flow commit protocol. Moving or sharing the handle across threads does not
// change what the mapped bytes may do.
unsafe impl<T> Send for Segment<T> {}
unsafe impl<T> Sync for Segment<T> {}

impl<T> std::fmt::Debug for Segment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.len)
            .field("path", &self.path)
            .finish()
    }
}

impl<T> Segment<T> {
    /// Create the backing file sized for the header plus `payload_size`
    /// bytes, map it read-write, and leave it zero-filled.
    pub fn create(path: &Path, payload_size: usize) -> Result<Self> {
        let total = mem::size_of::<T>() + payload_size;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    Error::AlreadyExists
                } else {
                    tracing::error!(path = %path.display(), error = %e, "segment create failed");
                    Error::Io(e)
                }
            })?;
        file.set_len(total as u64)?;

        // SAFETY: we own the freshly created file; the mapping covers it.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self {
            backing: Backing::ReadWrite(map),
            len: total,
            path: path.to_path_buf(),
            _marker: PhantomData,
        })
    }

    /// Map an existing file. The size comes from the file length; a file
    /// shorter than the header is rejected as corrupt.
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        let writable = match mode {
            AccessMode::CreateReadWrite => {
                return Err(Error::InvalidArg("open requires an open mode"));
            }
            AccessMode::OpenReadWrite => true,
            AccessMode::OpenReadOnly => false,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Error::NotFound
                } else {
                    tracing::error!(path = %path.display(), error = %e, "segment open failed");
                    Error::Io(e)
                }
            })?;

        let len = file.metadata()?.len() as usize;
        if len < mem::size_of::<T>() {
            tracing::error!(
                path = %path.display(),
                len,
                need = mem::size_of::<T>(),
                "segment shorter than its header"
            );
            return Err(Error::corrupt("segment shorter than its header"));
        }

        let backing = if writable {
            // SAFETY: mapping an existing file we just opened read-write.
            Backing::ReadWrite(unsafe { MmapOptions::new().map_mut(&file)? })
        } else {
            // SAFETY: mapping an existing file we just opened read-only.
            Backing::ReadOnly(unsafe { MmapOptions::new().map(&file)? })
        };

        Ok(Self {
            backing,
            len,
            path: path.to_path_buf(),
            _marker: PhantomData,
        })
    }

    /// Total mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload length in bytes (everything after the header).
    pub fn payload_len(&self) -> usize {
        self.len - mem::size_of::<T>()
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.backing, Backing::ReadWrite(_))
    }

    /// The path this segment was mapped from. Stale after a publish rename;
    /// only used for diagnostics.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Placement-initialize the header. Create-time only, before the segment
    /// is visible to any other process.
    ///
    /// # Panics
    ///
    /// Panics if the segment was mapped read-only.
    pub(crate) fn init_header(&self, value: T) {
        assert!(self.is_writable(), "init_header on read-only segment");
        // SAFETY: the mapping is page-aligned and at least size_of::<T>()
        // long; no other process can observe the file yet.
        unsafe { std::ptr::write(self.backing.as_ptr().cast_mut() as *mut T, value) }
    }

    /// Shared view of the header.
    pub fn header(&self) -> &T {
        // SAFETY: the mapping is at least size_of::<T>() long and T is a
        // repr(C) header type suitable for shared memory.
        unsafe { &*(self.backing.as_ptr() as *const T) }
    }

    /// Raw payload pointer; valid for `payload_len()` bytes.
    pub fn payload_ptr(&self) -> *const u8 {
        // SAFETY: in-bounds offset within the mapping.
        unsafe { self.backing.as_ptr().add(mem::size_of::<T>()) }
    }

    /// Shared view of the payload bytes.
    ///
    /// Other processes may rewrite these bytes while the slice is alive; the
    /// commit protocol tells readers which spans are stable.
    pub fn payload(&self) -> &[u8] {
        // SAFETY: pointer and length describe the mapped payload region.
        unsafe { std::slice::from_raw_parts(self.payload_ptr(), self.payload_len()) }
    }

    /// Mutable view of the payload bytes. Writer-side only.
    ///
    /// # Panics
    ///
    /// Panics if the segment was mapped read-only; that is a logic error in
    /// the caller, not a runtime condition.
    #[allow(clippy::mut_from_ref)]
    pub fn payload_mut(&self) -> &mut [u8] {
        assert!(self.is_writable(), "payload_mut on read-only segment");
        // SAFETY: read-write mapping; the single-writer convention makes this
        // the only in-process mutable view.
        unsafe {
            std::slice::from_raw_parts_mut(self.payload_ptr().cast_mut(), self.payload_len())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[repr(C)]
    struct TestHeader {
        magic: u64,
        counter: AtomicU64,
    }

    #[test]
    fn create_then_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");

        let seg = Segment::<TestHeader>::create(&path, 64).unwrap();
        assert_eq!(seg.payload_len(), 64);
        assert!(seg.is_writable());
        assert_eq!(seg.header().magic, 0, "fresh segment must be zero-filled");

        seg.header().counter.store(7, Ordering::Release);
        seg.payload_mut()[0] = 0xab;

        let other = Segment::<TestHeader>::open(&path, AccessMode::OpenReadOnly).unwrap();
        assert!(!other.is_writable());
        assert_eq!(other.header().counter.load(Ordering::Acquire), 7);
        assert_eq!(other.payload()[0], 0xab);
    }

    #[test]
    fn create_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        Segment::<TestHeader>::create(&path, 0).unwrap();
        assert!(matches!(
            Segment::<TestHeader>::create(&path, 0),
            Err(Error::AlreadyExists)
        ));
    }

    #[test]
    fn open_rejects_missing_and_truncated() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            Segment::<TestHeader>::open(&dir.path().join("absent"), AccessMode::OpenReadOnly),
            Err(Error::NotFound)
        ));

        let short = dir.path().join("short");
        std::fs::write(&short, [0u8; 4]).unwrap();
        let err = Segment::<TestHeader>::open(&short, AccessMode::OpenReadOnly).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn open_rejects_create_mode() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Segment::<TestHeader>::open(&dir.path().join("x"), AccessMode::CreateReadWrite),
            Err(Error::InvalidArg(_))
        ));
    }
}
