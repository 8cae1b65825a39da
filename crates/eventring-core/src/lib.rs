//! A fixed-capacity, single-writer/many-reader, lock-free shared-memory
//! event ring: producers append variable-sized events with a release store
//! on a descriptor sequence number; readers observe new events with an
//! acquire load and detect payload expiration via a sliding window.
//!
//! There is no mutex anywhere in this crate. The only coordination is a
//! handful of atomics in shared memory — see [`shm_layout`] for the binary
//! layout and [`recorder`]/[`iterator`] for the publish/consume protocol.
//!
//! This crate never calls into `tracing` on the recording or iteration hot
//! path (no allocation, no I/O there either); `init_file`/`mmap` may log on
//! their failure paths before returning a `Result`.

pub mod error;
pub mod fileinit;
pub mod iterator;
pub mod layout;
pub mod mapping;
pub mod recorder;
pub mod shm_layout;

pub use error::{last_error, EventRingError, RecordErrorKind, RecordErrorPayload, RECORD_ERROR_EVENT_TYPE};
pub use fileinit::init_file;
pub use iterator::{EventDescriptor, Iterator, PollOutcome};
pub use layout::{calc_storage, init_size, RingSize, EVENT_PAYLOAD_ALIGN, WINDOW_INCR};
pub use mapping::RingHandle;
pub use recorder::{PayloadSpan, Recorder, Reservation, Reserved};

pub use eventring_mmap::Protection;
