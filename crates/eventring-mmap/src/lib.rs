//! Low-level file and mmap primitives for `eventring-core`.
//!
//! The ring's mapping contract (see the core crate) takes an already-open
//! file descriptor and a byte offset, not a path: a ring image is one region
//! inside a possibly larger file, and the caller owns the fd's lifetime.
//! That rules out `memmap2::Mmap::map(&File)`, which always maps the whole
//! file from offset zero. `map_region`/`unmap_region` below talk to
//! `libc::mmap`/`munmap` directly, passing the fd and offset straight
//! through.
//!
//! `memmap2` is kept as a dependency for the convenience whole-file helpers
//! (`create_sized_file`/`open_*`) used by demos and tests that just want "a
//! file with a ring in it", where owning the mapping end-to-end is simpler
//! than juggling a raw fd.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::ptr;

/// Requested protection for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
}

impl Protection {
    fn as_prot(self) -> libc::c_int {
        match self {
            Protection::ReadOnly => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// A single `mmap`'d region of a file, owned independently of the fd that
/// created it.
///
/// Dropping unmaps the region. `unmap` is also exposed explicitly so callers
/// that want to invalidate a handle ahead of scope exit can do so and observe
/// any `munmap` failure (dropped mappings ignore it, matching the mmap crate
/// the rest of the workspace uses).
pub struct MappedRegion {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapped bytes are shared memory by construction; `MappedRegion`
// only hands out access through the caller's own synchronization (the ring's
// seqno/window protocol), so moving the handle across threads is safe.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes of `fd` starting at `offset`, with the requested
    /// protection and `MAP_SHARED` so writes are visible to other mappers.
    ///
    /// # Safety
    /// `fd` must refer to a file at least `offset + len` bytes long, open
    /// with access matching `protection`.
    pub unsafe fn map(fd: RawFd, offset: u64, len: usize, protection: Protection) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-length mapping"));
        }
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                protection.as_prot(),
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { ptr: ptr as *mut u8, len })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Explicitly unmaps the region, returning any OS error. Subsequent drop
    /// is then a no-op.
    pub fn unmap(mut self) -> io::Result<()> {
        let result = unsafe { unmap_raw(self.ptr, self.len) };
        self.ptr = ptr::null_mut();
        self.len = 0;
        result
    }
}

unsafe fn unmap_raw(ptr: *mut u8, len: usize) -> io::Result<()> {
    if ptr.is_null() || len == 0 {
        return Ok(());
    }
    let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        let _ = unsafe { unmap_raw(self.ptr, self.len) };
    }
}

/// Creates (or truncates) a file at `path` sized to at least `size_bytes`,
/// opened read-write. The caller is responsible for `init_file`-ing a ring
/// image somewhere inside it.
pub fn create_sized_file<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    if file.metadata()?.len() < size_bytes {
        file.set_len(size_bytes)?;
    }
    Ok(file)
}

/// Opens an existing file read-write, for mapping an already-initialized ring.
pub fn open_rw_file<P: AsRef<Path>>(path: P) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Opens an existing file read-only, for mapping a ring a process will only consume.
pub fn open_ro_file<P: AsRef<Path>>(path: P) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

/// Convenience: map the whole of `file` (offset zero) with the given protection.
///
/// This is the common case for demos/tests that keep one ring per file; the
/// core crate's `mmap` function uses `MappedRegion::map` directly so it can
/// honor an arbitrary offset within a shared file.
pub fn map_whole_file(file: &File, len: usize, protection: Protection) -> io::Result<MappedRegion> {
    unsafe { MappedRegion::map(file.as_raw_fd(), 0, len, protection) }
}
