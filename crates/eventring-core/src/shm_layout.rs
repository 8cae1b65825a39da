//! Binary layout of the ring image: header, control block, and descriptor slot.
//!
//! The layout is designed to be read bit-identically by any process mapping
//! the file, regardless of software version, as long as `magic`/`version`
//! and `schema_hash` agree. The header occupies a reserved 4 KiB region even
//! though the struct itself is 192 bytes, so a future header field can grow
//! without moving the descriptor ring.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐  offset 0
//! │ magic(6) content_type(2) schema_hash(32) sizes(24)          │  (64 B, one cache line)
//! ├────────────────────────────────────────────────────────────┤  offset 64
//! │ last_seqno(8) next_payload_byte(8) pad(48)                  │  (64 B, writer-owned line)
//! ├────────────────────────────────────────────────────────────┤  offset 128
//! │ buffer_window_start(8) pad(56)                               │  (64 B, published line)
//! ├────────────────────────────────────────────────────────────┤  offset 4096 (4K-aligned)
//! │ descriptor_capacity * 64 bytes of DescriptorSlot             │
//! ├────────────────────────────────────────────────────────────┤  4K-aligned
//! │ payload_buf_size bytes                                       │
//! ├────────────────────────────────────────────────────────────┤  large-page-aligned
//! │ context_area_size bytes                                      │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::mem::{MaybeUninit, size_of};
use std::sync::atomic::AtomicU64;

/// Magic + version octets: ASCII `RING01`. The trailing two bytes are the
/// version digits; bump them when the layout changes incompatibly.
pub const RING_MAGIC: [u8; 6] = *b"RING01";

/// Reserved, 4K-aligned size of the header region. The `RingHeader` struct
/// itself is smaller; the remainder is unused padding so the descriptor ring
/// always starts on a page boundary.
pub const HEADER_REGION_SIZE: u64 = 4096;

/// `const { assert!(...) }` helper so layout regressions fail to compile
/// instead of surfacing as a cross-process ABI mismatch at runtime.
macro_rules! const_assert_size {
    ($ty:ty, $expected:expr) => {
        const _: () = assert!(size_of::<$ty>() == $expected, "layout size changed");
    };
}

/// Fixed 64-byte prefix: magic, content type, schema hash, and the three
/// ring sizes. Field order and widths are part of the on-disk contract.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RingHeaderPrefix {
    pub magic: [u8; 6],
    pub content_type: u16,
    pub schema_hash: [u8; 32],
    pub descriptor_capacity: u64,
    pub payload_buf_size: u64,
    pub context_area_size: u64,
}

/// Writer-owned cache line: `last_seqno` and `next_payload_byte`. Both are
/// only ever touched by the single recorder, but are atomics so a reader can
/// take a torn-free snapshot for diagnostics (`init_iterator`, gap reports).
#[repr(C, align(64))]
pub struct ControlBlockLine0 {
    pub last_seqno: AtomicU64,
    pub next_payload_byte: AtomicU64,
    _pad: [u8; 48],
}

/// Separate cache line carrying `buffer_window_start`, so readers polling
/// the window don't false-share with the writer's hot fields.
#[repr(C, align(64))]
pub struct ControlBlockLine1 {
    pub buffer_window_start: AtomicU64,
    _pad: [u8; 56],
}

/// The full on-disk header: prefix plus the two control-block lines.
#[repr(C)]
pub struct RingHeader {
    pub prefix: RingHeaderPrefix,
    pub ctrl0: ControlBlockLine0,
    pub ctrl1: ControlBlockLine1,
}

impl RingHeader {
    pub fn validate_sizes(&self) -> bool {
        self.prefix.descriptor_capacity.is_power_of_two() && self.prefix.payload_buf_size.is_power_of_two()
    }
}

/// Everything in a descriptor except the publication witness: the fields the
/// writer fills in steps 7 before publishing in step 8.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DescriptorBody {
    pub event_type: u16,
    pub(crate) reserved: u16,
    pub payload_size: u32,
    pub record_epoch_nanos: u64,
    pub payload_buf_offset: u64,
    pub content_ext: [u64; 4],
}

impl DescriptorBody {
    pub fn new(
        event_type: u16,
        payload_size: u32,
        record_epoch_nanos: u64,
        payload_buf_offset: u64,
        content_ext: [u64; 4],
    ) -> Self {
        Self {
            event_type,
            reserved: 0,
            payload_size,
            record_epoch_nanos,
            payload_buf_offset,
            content_ext,
        }
    }
}

/// One 64-byte, cache-line-aligned descriptor slot: an atomic `seqno`
/// publication witness over a plain descriptor body.
///
/// `body` is `MaybeUninit` rather than a plain field because it is written
/// and read through raw pointers derived from the mapping's base address,
/// never through a live `&mut` shared across the writer/reader boundary.
#[repr(C, align(64))]
pub struct DescriptorSlot {
    pub seqno: AtomicU64,
    pub body: MaybeUninit<DescriptorBody>,
}

impl DescriptorSlot {
    /// The sentinel value meaning "never written".
    pub const UNUSED: u64 = 0;
}

const_assert_size!(RingHeaderPrefix, 64);
const_assert_size!(ControlBlockLine0, 64);
const_assert_size!(ControlBlockLine1, 64);
const_assert_size!(RingHeader, 192);
const_assert_size!(DescriptorBody, 56);
const_assert_size!(DescriptorSlot, 64);
