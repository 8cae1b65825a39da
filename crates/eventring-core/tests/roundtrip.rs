//! Round-trip encoding, schema-mismatch, and single-event record/read scenarios.

use eventring_core::{init_file, init_size, EventRingError, Protection, Recorder, RingHandle};
use eventring_registry::{demo_schema_hash, ContentTypeId};
use std::os::unix::io::AsRawFd;
use std::time::{SystemTime, UNIX_EPOCH};

fn tmp_path(label: &str) -> String {
    let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("/tmp/eventring_roundtrip_test_{label}_{ts}")
}

#[test]
fn init_size_init_file_mmap_preserve_inputs() {
    let size = init_size(16, 27, 0).unwrap();
    let total = eventring_core::calc_storage(&size);
    let path = tmp_path("roundtrip");
    let file = eventring_mmap::create_sized_file(&path, total).unwrap();
    let schema_hash = demo_schema_hash();

    unsafe {
        init_file(&size, ContentTypeId::DEMO.0, schema_hash, file.as_raw_fd(), 0).unwrap();
    }

    let handle =
        unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadWrite, Some(schema_hash)).unwrap() };

    assert_eq!(handle.content_type(), ContentTypeId::DEMO.0);
    assert_eq!(handle.schema_hash(), schema_hash);
    assert_eq!(handle.size().descriptor_capacity, size.descriptor_capacity);
    assert_eq!(handle.size().payload_buf_size, size.payload_buf_size);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn schema_mismatch_fails_closed() {
    let size = init_size(16, 27, 0).unwrap();
    let total = eventring_core::calc_storage(&size);
    let path = tmp_path("schema_mismatch");
    let file = eventring_mmap::create_sized_file(&path, total).unwrap();

    let h1 = [0xAAu8; 32];
    let h2 = [0xBBu8; 32];
    unsafe {
        init_file(&size, ContentTypeId::DEMO.0, h1, file.as_raw_fd(), 0).unwrap();
    }

    let result = unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadOnly, Some(h2)) };
    assert!(matches!(result, Err(EventRingError::SchemaMismatch)));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn single_event_single_process() {
    let size = init_size(16, 27, 0).unwrap();
    let total = eventring_core::calc_storage(&size);
    let path = tmp_path("single_event");
    let file = eventring_mmap::create_sized_file(&path, total).unwrap();
    let schema_hash = demo_schema_hash();
    unsafe {
        init_file(&size, ContentTypeId::DEMO.0, schema_hash, file.as_raw_fd(), 0).unwrap();
    }

    let handle =
        unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadWrite, Some(schema_hash)).unwrap() };
    let mut recorder = Recorder::new(&handle).unwrap();
    let seqno = recorder.record(2, &[0xDE, 0xAD, 0xBE, 0xEF], [0; 4]);
    assert_eq!(seqno, 1);

    let reader = eventring_core::Iterator::new(&handle);
    let desc = reader.try_copy(1).unwrap();
    let mut dst = [0u8; 4];
    reader.payload_memcpy(&desc, &mut dst).unwrap();
    assert_eq!(dst, [0xDE, 0xAD, 0xBE, 0xEF]);

    let _ = std::fs::remove_file(&path);
}
