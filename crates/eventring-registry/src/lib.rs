//! Content-type registry: the independent `event_type` namespaces a ring's
//! `content_type` tag selects between, plus one demo content type used by
//! the workspace's demos, tests, and benchmarks.
//!
//! Each content type is a `#[repr(C, packed)]`, `Copy` POD event struct with
//! its size and alignment pinned by a `#[test]`, so a layout regression fails
//! to compile or fails a test rather than surfacing as a cross-process ABI
//! break.

use eventring_core::RECORD_ERROR_EVENT_TYPE;

/// A ring's `content_type` tag: the independent namespace its `event_type`
/// values are drawn from. `0` is reserved as invalid by every namespace.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentTypeId(pub u16);

impl ContentTypeId {
    pub const INVALID: ContentTypeId = ContentTypeId(0);
    pub const DEMO: ContentTypeId = ContentTypeId(1);
}

/// Human-readable name for a known `content_type`, or `None` for an
/// unregistered tag (the ring itself never validates this; only consumers
/// that want diagnostics do).
pub fn content_type_name(id: ContentTypeId) -> Option<&'static str> {
    match id {
        ContentTypeId::INVALID => Some("INVALID"),
        ContentTypeId::DEMO => Some("DEMO"),
        _ => None,
    }
}

/// `event_type` values within [`ContentTypeId::DEMO`]'s namespace.
/// Value `1` is reserved everywhere for `RECORD_ERROR`.
pub mod demo_event_type {
    pub const RECORD_ERROR: u16 = super::RECORD_ERROR_EVENT_TYPE;
    pub const TICK: u16 = 2;
}

/// One POD market-data-shaped demo event: a symbol id, a price, and a
/// quantity. `#[repr(C, packed)]`, `Copy`, so it can be written straight
/// into the ring's payload buffer as raw bytes with no serialization step.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DemoTick {
    pub symbol_id: u16,
    pub price_ticks: i64,
    pub qty_lots: i64,
}

impl DemoTick {
    pub fn as_bytes(&self) -> [u8; std::mem::size_of::<DemoTick>()] {
        // SAFETY: `DemoTick` is `#[repr(C, packed)]` and `Copy`; every bit
        // pattern of its fields is valid, so a byte-for-byte reinterpret is
        // sound in both directions.
        unsafe { std::mem::transmute(*self) }
    }

    pub fn from_bytes(bytes: [u8; std::mem::size_of::<DemoTick>()]) -> Self {
        unsafe { std::mem::transmute(bytes) }
    }
}

/// Computes the 32-byte schema hash pinned in a ring's header: a SHA-256
/// digest of a schema description string. Two rings agree on their event
/// layout iff this hash matches — the hash is not derived from Rust's
/// `TypeId` or any other process-local identifier, since it must compare
/// equal across independently compiled binaries.
pub fn schema_hash(schema_description: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(schema_description.as_bytes());
    digest.into()
}

/// The schema description for [`ContentTypeId::DEMO`]: one event type
/// (`TICK`) carrying a [`DemoTick`] payload, plus the universal
/// `RECORD_ERROR` event every content type reserves at `event_type == 1`.
pub const DEMO_SCHEMA_DESCRIPTION: &str = "eventring-registry/demo/v1:tick=DemoTick{symbol_id:u16,price_ticks:i64,qty_lots:i64}";

pub fn demo_schema_hash() -> [u8; 32] {
    schema_hash(DEMO_SCHEMA_DESCRIPTION)
}
