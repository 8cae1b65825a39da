//! Maps a ring image into the current process's address space and validates
//! it on the way in.
//!
//! The library surface takes no size parameter at map time (only an fd and
//! an offset): any process attaching to a ring learns the sizes from the
//! header itself. That means mapping is necessarily two-phase — map just
//! enough to read `RingHeaderPrefix`, then remap the full image once the
//! real sizes are known, validate it, and derive the two masks from the
//! variable descriptor/payload/context regions described in `layout.rs`.

use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;

use eventring_mmap::{MappedRegion, Protection};

use crate::error::{set_last_error, EventRingError};
use crate::layout::{self, RingSize};
use crate::shm_layout::{
    ControlBlockLine0, ControlBlockLine1, DescriptorSlot, RingHeader, RingHeaderPrefix,
    HEADER_REGION_SIZE, RING_MAGIC,
};

/// A mapped, validated ring image.
///
/// Holds the one `mmap` region backing the header, descriptor ring, payload
/// buffer, and context area, plus the derived pointers and masks every
/// `Recorder`/`Iterator` needs. Dropping the handle unmaps the region.
pub struct RingHandle {
    region: MappedRegion,
    protection: Protection,
    size: RingSize,
    content_type: u16,
    schema_hash: [u8; 32],
}

// SAFETY: all access to the mapped bytes goes through the ring's own
// seqno/window protocol; the handle itself holds no interior mutability
// beyond what `MappedRegion` already permits across threads.
unsafe impl Sync for RingHandle {}

impl RingHandle {
    /// Maps the ring image living at `offset` within `fd`.
    ///
    /// `expected_schema_hash`, if given, is compared against the header's
    /// pinned hash; a mismatch fails closed with [`EventRingError::SchemaMismatch`]
    /// and leaves no mapping behind.
    ///
    /// # Safety
    /// `fd` must refer to an already-initialized ring image (see
    /// [`crate::fileinit::init_file`]) at least [`layout::calc_storage`] bytes
    /// long starting at `offset`, open with access matching `protection`.
    pub unsafe fn mmap(
        fd: RawFd,
        offset: u64,
        protection: Protection,
        expected_schema_hash: Option<[u8; 32]>,
    ) -> Result<Self, EventRingError> {
        // Phase 1: map just the header region to learn the real sizes.
        let prefix = unsafe {
            let probe = MappedRegion::map(fd, offset, HEADER_REGION_SIZE as usize, Protection::ReadOnly)
                .map_err(|e| record_error(EventRingError::IoError(e)))?;
            let header = &*(probe.as_ptr() as *const RingHeaderPrefix);
            let copy = *header;
            drop(probe);
            copy
        };

        if prefix.magic != RING_MAGIC {
            return Err(record_error(EventRingError::BadMagic));
        }
        if !prefix.descriptor_capacity.is_power_of_two()
            || !(layout::DESCRIPTOR_SHIFT_MIN..=layout::DESCRIPTOR_SHIFT_MAX)
                .contains(&prefix.descriptor_capacity.trailing_zeros())
            || !prefix.payload_buf_size.is_power_of_two()
            || !(layout::PAYLOAD_SHIFT_MIN..=layout::PAYLOAD_SHIFT_MAX)
                .contains(&prefix.payload_buf_size.trailing_zeros())
        {
            return Err(record_error(EventRingError::InvalidSize(format!(
                "header declares descriptor_capacity={}, payload_buf_size={} outside documented bounds",
                prefix.descriptor_capacity, prefix.payload_buf_size
            ))));
        }
        if let Some(expected) = expected_schema_hash {
            if expected != prefix.schema_hash {
                return Err(record_error(EventRingError::SchemaMismatch));
            }
        }

        let size = RingSize {
            descriptor_capacity: prefix.descriptor_capacity,
            payload_buf_size: prefix.payload_buf_size,
            context_area_size: prefix.context_area_size,
        };
        let total = layout::calc_storage(&size);

        // Phase 2: remap the whole image now that its true extent is known.
        let region = unsafe {
            MappedRegion::map(fd, offset, total as usize, protection)
                .map_err(|e| record_error(EventRingError::IoError(e)))?
        };

        Ok(Self {
            region,
            protection,
            size,
            content_type: prefix.content_type,
            schema_hash: prefix.schema_hash,
        })
    }

    /// Unmaps the region, consuming the handle. Equivalent to dropping it,
    /// but lets a caller observe a `munmap` failure.
    pub fn unmap(self) -> Result<(), EventRingError> {
        self.region.unmap().map_err(EventRingError::IoError)
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn size(&self) -> RingSize {
        self.size
    }

    pub fn content_type(&self) -> u16 {
        self.content_type
    }

    pub fn schema_hash(&self) -> [u8; 32] {
        self.schema_hash
    }

    pub fn desc_capacity_mask(&self) -> u64 {
        self.size.descriptor_mask()
    }

    pub fn payload_buf_mask(&self) -> u64 {
        self.size.payload_mask()
    }

    fn base(&self) -> *const u8 {
        self.region.as_ptr()
    }

    pub(crate) fn header(&self) -> &RingHeader {
        // SAFETY: the region is at least `calc_storage(size)` bytes and the
        // header always occupies its prefix, validated at map time.
        unsafe { &*(self.base() as *const RingHeader) }
    }

    pub(crate) fn ctrl0(&self) -> &ControlBlockLine0 {
        &self.header().ctrl0
    }

    pub(crate) fn ctrl1(&self) -> &ControlBlockLine1 {
        &self.header().ctrl1
    }

    pub(crate) fn descriptor_slot_ptr(&self, index: u64) -> *mut DescriptorSlot {
        debug_assert!(index < self.size.descriptor_capacity);
        let desc_base = unsafe { self.base().add(layout::descriptor_region_offset() as usize) };
        (desc_base as *mut DescriptorSlot).wrapping_add(index as usize)
    }

    pub(crate) fn payload_base(&self) -> *mut u8 {
        let off = layout::payload_region_offset(&self.size);
        unsafe { self.base().add(off as usize) as *mut u8 }
    }

    /// Pointer to the start of the opaque, ring-specific context area. The
    /// ring core never interprets these bytes; callers agree on their
    /// meaning out of band (e.g. via the content-type registry).
    pub fn context_area_ptr(&self) -> *mut u8 {
        let off = layout::context_region_offset(&self.size);
        unsafe { self.base().add(off as usize) as *mut u8 }
    }

    /// Size in bytes of the context area, as declared in the header.
    pub fn context_area_size(&self) -> u64 {
        self.size.context_area_size
    }

    /// Requires read-write access; returns [`EventRingError::BadFile`] for a
    /// read-only handle. Called by `Recorder::new`.
    pub(crate) fn require_writable(&self) -> Result<(), EventRingError> {
        if self.protection != Protection::ReadWrite {
            return Err(record_error(EventRingError::BadFile(
                "ring mapped read-only; recording requires read-write".into(),
            )));
        }
        Ok(())
    }
}

fn record_error(err: EventRingError) -> EventRingError {
    tracing::warn!(error = %err, "mmap failed");
    set_last_error(&err);
    err
}

/// Loads `buffer_window_start` with acquire ordering — the publication the
/// window-expiry check synchronizes with.
#[inline(always)]
pub(crate) fn load_window_start(handle: &RingHandle) -> u64 {
    handle.ctrl1().buffer_window_start.load(Ordering::Acquire)
}

/// Publishes a new `buffer_window_start` with release ordering.
#[inline(always)]
pub(crate) fn store_window_start(handle: &RingHandle, value: u64) {
    handle
        .ctrl1()
        .buffer_window_start
        .store(value, Ordering::Release);
}

/// Loads `last_seqno` with acquire ordering, for `init_iterator`'s "most
/// recently produced event" cursor and for diagnostic snapshots.
#[inline(always)]
pub(crate) fn load_last_seqno(handle: &RingHandle) -> u64 {
    handle.ctrl0().last_seqno.load(Ordering::Acquire)
}

