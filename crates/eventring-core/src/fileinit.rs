//! Writes a fresh ring image into an already-sized file region.
//!
//! Writes through a raw `fd`/`offset` pair (via `eventring-mmap`) rather than
//! owning a fresh whole-file mapping: a ring image is one region of a
//! possibly larger file, so `init_file` cannot assume it owns offset zero.

use std::os::unix::io::RawFd;
use std::ptr;

use eventring_mmap::{MappedRegion, Protection};

use crate::error::{set_last_error, EventRingError};
use crate::layout::{self, RingSize};
use crate::shm_layout::{RingHeaderPrefix, RING_MAGIC};

/// Writes a fresh, zeroed ring image of `size` at `offset` within `fd`.
///
/// The caller must have already sized the file to at least
/// `layout::calc_storage(&size)` bytes past `offset` (e.g. via
/// `File::set_len`/`ftruncate`); `init_file` never grows the file itself.
///
/// # Safety
/// `fd` must be open for writing and refer to a region of at least
/// `layout::calc_storage(&size)` bytes starting at `offset`.
pub unsafe fn init_file(
    size: &RingSize,
    content_type: u16,
    schema_hash: [u8; 32],
    fd: RawFd,
    offset: u64,
) -> Result<(), EventRingError> {
    let total = layout::calc_storage(size);
    let mut region = unsafe {
        MappedRegion::map(fd, offset, total as usize, Protection::ReadWrite)
            .map_err(|e| record(EventRingError::IoError(e)))?
    };

    // SAFETY: `region` is exclusively ours for the duration of this call; no
    // other mapping of this offset can exist yet unless the file was already
    // initialized, which we check for below before overwriting anything.
    let base = region.as_mut_ptr();
    let existing_magic = unsafe { std::slice::from_raw_parts(base, RING_MAGIC.len()) };
    if existing_magic == RING_MAGIC {
        return Err(record(EventRingError::AlreadyInitialized));
    }

    unsafe {
        let prefix_ptr = base as *mut RingHeaderPrefix;
        ptr::write(
            prefix_ptr,
            RingHeaderPrefix {
                magic: RING_MAGIC,
                content_type,
                schema_hash,
                descriptor_capacity: size.descriptor_capacity,
                payload_buf_size: size.payload_buf_size,
                context_area_size: size.context_area_size,
            },
        );

        let header = &*(base as *const crate::shm_layout::RingHeader);
        header.ctrl0.last_seqno.store(0, std::sync::atomic::Ordering::Relaxed);
        header.ctrl0.next_payload_byte.store(0, std::sync::atomic::Ordering::Relaxed);
        header
            .ctrl1
            .buffer_window_start
            .store(0, std::sync::atomic::Ordering::Relaxed);

        let desc_base = base.add(layout::descriptor_region_offset() as usize);
        let desc_bytes = (size.descriptor_capacity * 64) as usize;
        ptr::write_bytes(desc_base, 0, desc_bytes);
    }

    Ok(())
}

fn record(err: EventRingError) -> EventRingError {
    tracing::warn!(error = %err, "init_file failed");
    set_last_error(&err);
    err
}
