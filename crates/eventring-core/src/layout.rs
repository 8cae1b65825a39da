//! Ring sizing: shift-encoded capacities, alignment constants, and the index
//! arithmetic shared by the recorder and the iterator.

use crate::error::EventRingError;
use crate::shm_layout::HEADER_REGION_SIZE;

/// Minimum required alignment of a payload's start offset within the payload
/// buffer. Named after the field in the byte-offset table; kept as a crate
/// constant rather than a magic `16` scattered through `layout`/`recorder`.
pub const EVENT_PAYLOAD_ALIGN: u64 = 16;

/// Size of one window advance step. The writer only publishes
/// `buffer_window_start` in units of this increment, trading precision for
/// fewer atomic stores on the hot path.
pub const WINDOW_INCR: u64 = 1 << 24;

/// Large-page granularity used to align the context area.
pub const LARGE_PAGE_SIZE: u64 = 2 * 1024 * 1024;

pub const DESCRIPTOR_SHIFT_MIN: u32 = 16;
pub const DESCRIPTOR_SHIFT_MAX: u32 = 32;
pub const PAYLOAD_SHIFT_MIN: u32 = 27;
pub const PAYLOAD_SHIFT_MAX: u32 = 40;

/// The three sizes that, together with the header, determine the total
/// ring image size. All three are powers of two (`descriptor_capacity`,
/// `payload_buf_size`) or a multiple of the large page size
/// (`context_area_size`).
#[derive(Debug, Clone, Copy)]
pub struct RingSize {
    pub descriptor_capacity: u64,
    pub payload_buf_size: u64,
    pub context_area_size: u64,
}

impl RingSize {
    pub fn descriptor_mask(&self) -> u64 {
        self.descriptor_capacity - 1
    }

    pub fn payload_mask(&self) -> u64 {
        self.payload_buf_size - 1
    }
}

/// Rounds `value` up to the next multiple of `align`. `align` must be a
/// power of two.
pub fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Computes the three ring sizes from shift parameters, validating the
/// documented bounds.
///
/// `descriptor_shift` and `payload_shift` give capacities of
/// `1 << descriptor_shift` descriptors and `1 << payload_shift` payload
/// bytes respectively. `context_large_pages` is the number of large pages
/// reserved for the context area (may be zero).
pub fn init_size(
    descriptor_shift: u32,
    payload_shift: u32,
    context_large_pages: u64,
) -> Result<RingSize, EventRingError> {
    if !(DESCRIPTOR_SHIFT_MIN..=DESCRIPTOR_SHIFT_MAX).contains(&descriptor_shift) {
        return Err(EventRingError::InvalidSize(format!(
            "descriptor_shift {descriptor_shift} out of range [{DESCRIPTOR_SHIFT_MIN}, {DESCRIPTOR_SHIFT_MAX}]"
        )));
    }
    if !(PAYLOAD_SHIFT_MIN..=PAYLOAD_SHIFT_MAX).contains(&payload_shift) {
        return Err(EventRingError::InvalidSize(format!(
            "payload_shift {payload_shift} out of range [{PAYLOAD_SHIFT_MIN}, {PAYLOAD_SHIFT_MAX}]"
        )));
    }
    Ok(RingSize {
        descriptor_capacity: 1u64 << descriptor_shift,
        payload_buf_size: 1u64 << payload_shift,
        context_area_size: context_large_pages * LARGE_PAGE_SIZE,
    })
}

/// Total bytes the ring image occupies: header region, descriptor ring,
/// payload buffer, and context area, each aligned per the byte-offset table.
pub fn calc_storage(size: &RingSize) -> u64 {
    let header_end = HEADER_REGION_SIZE;
    let descriptors_start = round_up(header_end, 4096);
    let descriptors_end = descriptors_start + size.descriptor_capacity * 64;
    let payload_start = round_up(descriptors_end, 4096);
    let payload_end = payload_start + size.payload_buf_size;
    let context_start = round_up(payload_end, LARGE_PAGE_SIZE);
    context_start + size.context_area_size
}

/// Byte offset of the descriptor ring within the image.
pub fn descriptor_region_offset() -> u64 {
    round_up(HEADER_REGION_SIZE, 4096)
}

/// Byte offset of the payload buffer within the image.
pub fn payload_region_offset(size: &RingSize) -> u64 {
    let descriptors_end = descriptor_region_offset() + size.descriptor_capacity * 64;
    round_up(descriptors_end, 4096)
}

/// Byte offset of the context area within the image.
pub fn context_region_offset(size: &RingSize) -> u64 {
    let payload_end = payload_region_offset(size) + size.payload_buf_size;
    round_up(payload_end, LARGE_PAGE_SIZE)
}

/// Converts a 1-based `seqno` to its slot index, given `mask = capacity - 1`.
///
/// Descriptors are numbered from 1 (0 means "unused"), so the index is
/// `(seqno - 1) & mask` rather than `seqno & mask`.
pub fn seq_to_index(seqno_1_based: u64, mask: u64) -> u64 {
    debug_assert!(seqno_1_based >= 1);
    (seqno_1_based - 1) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_is_idempotent_on_aligned_values() {
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
        assert_eq!(round_up(0, 4096), 0);
    }

    #[test]
    fn init_size_rejects_out_of_range_shifts() {
        assert!(init_size(DESCRIPTOR_SHIFT_MIN - 1, PAYLOAD_SHIFT_MIN, 0).is_err());
        assert!(init_size(DESCRIPTOR_SHIFT_MIN, PAYLOAD_SHIFT_MAX + 1, 0).is_err());
    }

    #[test]
    fn seq_to_index_wraps_on_mask() {
        let mask = (1u64 << 4) - 1;
        assert_eq!(seq_to_index(1, mask), 0);
        assert_eq!(seq_to_index(16, mask), 15);
        assert_eq!(seq_to_index(17, mask), 0);
    }

    #[test]
    fn calc_storage_keeps_regions_in_order() {
        let size = init_size(16, 27, 0).unwrap();
        let total = calc_storage(&size);
        let desc_off = descriptor_region_offset();
        let payload_off = payload_region_offset(&size);
        let ctx_off = context_region_offset(&size);
        assert!(desc_off < payload_off);
        assert!(payload_off < ctx_off);
        assert!(ctx_off <= total);
    }
}
