//! Error types, the synthetic `RECORD_ERROR` event payload, and a
//! thread-local last-error buffer for callers that want a human-readable
//! string without threading `Result` through an FFI boundary.

use std::cell::RefCell;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventRingError {
    #[error("invalid ring size: {0}")]
    InvalidSize(String),

    #[error("bad ring file: {0}")]
    BadFile(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("bad magic or version in ring header")]
    BadMagic,

    #[error("schema hash mismatch")]
    SchemaMismatch,

    #[error("ring file is already initialized")]
    AlreadyInitialized,
}

/// Kind of the synthetic `RECORD_ERROR` event (`event_type == 1`, reserved
/// across every content type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordErrorKind {
    None = 0,
    Overflow4Gb = 1,
    OverflowExpire = 2,
    MissingEvent = 3,
}

/// `event_type` reserved for the synthetic `RECORD_ERROR` event, in every
/// content type's namespace.
pub const RECORD_ERROR_EVENT_TYPE: u16 = 1;

/// Payload carried by a `RECORD_ERROR` descriptor: what kind of failure
/// occurred, which event type was discarded, and the sizes involved.
///
/// `requested_payload_size` is the caller's untruncated request and must
/// hold values one past `u32::MAX` (the `Overflow4Gb` case is defined by
/// `payload_size > u32::MAX`), so it is a full `u64`, unlike the
/// descriptor's own `payload_size` field which is genuinely clamped to what
/// was written.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RecordErrorPayload {
    pub error_kind: u16,
    pub discarded_event_type: u16,
    pub truncated_payload_size: u32,
    pub requested_payload_size: u64,
}

impl RecordErrorPayload {
    pub fn new(
        kind: RecordErrorKind,
        discarded_event_type: u16,
        truncated_payload_size: u32,
        requested_payload_size: u64,
    ) -> Self {
        Self {
            error_kind: kind as u16,
            discarded_event_type,
            truncated_payload_size,
            requested_payload_size,
        }
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..2].copy_from_slice(&self.error_kind.to_ne_bytes());
        out[2..4].copy_from_slice(&self.discarded_event_type.to_ne_bytes());
        out[4..8].copy_from_slice(&self.truncated_payload_size.to_ne_bytes());
        out[8..16].copy_from_slice(&self.requested_payload_size.to_ne_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self {
            error_kind: u16::from_ne_bytes(bytes[0..2].try_into().unwrap()),
            discarded_event_type: u16::from_ne_bytes(bytes[2..4].try_into().unwrap()),
            truncated_payload_size: u32::from_ne_bytes(bytes[4..8].try_into().unwrap()),
            requested_payload_size: u64::from_ne_bytes(bytes[8..16].try_into().unwrap()),
        }
    }
}

const LAST_ERROR_CAPACITY: usize = 256;

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

pub(crate) fn set_last_error(err: &EventRingError) {
    LAST_ERROR.with(|cell| {
        let mut msg = err.to_string();
        msg.truncate(LAST_ERROR_CAPACITY);
        *cell.borrow_mut() = msg;
    });
}

/// The message from the most recent `EventRingError` produced on this
/// thread, or an empty string if none has occurred yet.
pub fn last_error() -> String {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}
