//! Cross-process concurrency and gap-detection scenarios, run as two
//! genuinely separate OS processes sharing only the ring file.
//!
//! Self-spawning pattern: the same test executable re-invokes itself with an
//! environment variable selecting the writer or reader role, so memory
//! ordering is exercised across a real process boundary rather than just
//! across threads in one address space.

use std::env;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use eventring_core::{init_file, init_size, Iterator as RingIterator, PollOutcome, Protection, Recorder, RingHandle};
use eventring_registry::ContentTypeId;

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "EVENTRING_E2E_ROLE";
const ENV_PATH: &str = "EVENTRING_E2E_PATH";
const ROLE_WRITER: &str = "writer";
const ROLE_READER: &str = "reader";

const EVENT_COUNT: u64 = 1_000_000;
const DESCRIPTOR_SHIFT: u32 = 20; // capacity 1_048_576, comfortably above EVENT_COUNT
const PAYLOAD_SHIFT: u32 = 27; // 128 MiB, plenty for 64-byte events

fn test_path(label: &str) -> String {
    let pid = std::process::id();
    format!("/tmp/eventring_e2e_{label}_{pid}")
}

fn run_writer(path: &str) {
    let size = init_size(DESCRIPTOR_SHIFT, PAYLOAD_SHIFT, 0).unwrap();
    let total = eventring_core::calc_storage(&size);
    let file = eventring_mmap::create_sized_file(path, total).unwrap();
    unsafe {
        init_file(&size, ContentTypeId::DEMO.0, [0u8; 32], file.as_raw_fd(), 0).unwrap();
    }
    let handle =
        unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadWrite, None).unwrap() };
    let mut recorder = Recorder::new(&handle).unwrap();

    log!("[WRITER] recording {EVENT_COUNT} events of 64 bytes");
    let payload = [0x5Au8; 64];
    let start = Instant::now();
    for i in 0..EVENT_COUNT {
        recorder.record(2, &payload, [i, 0, 0, 0]);
    }
    log!("[WRITER] done in {:?}", start.elapsed());
}

fn run_reader(path: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let file = loop {
        match eventring_mmap::open_ro_file(path) {
            Ok(f) => break f,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("[READER] failed to open ring file: {e}"),
        }
    };

    // The writer creates the file before it has written the header (magic,
    // sizes); retry the mmap itself until that header lands.
    let handle = loop {
        match unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadOnly, None) } {
            Ok(h) => break h,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("[READER] failed to map ring: {e}"),
        }
    };
    let mut reader = RingIterator::new_behind(&handle, EVENT_COUNT);

    let mut observed: u64 = 0;
    let mut lost: u64 = 0;
    let mut last_seqno = 0u64;
    let read_deadline = Instant::now() + Duration::from_secs(30);
    let mut idle_spins = 0u32;

    while Instant::now() < read_deadline {
        match reader.poll() {
            PollOutcome::Event(desc) => {
                observed += 1;
                last_seqno = desc.seqno;
                idle_spins = 0;
            }
            PollOutcome::Gap { lost: n, resumed_seqno } => {
                lost += n;
                last_seqno = resumed_seqno - 1;
                idle_spins = 0;
            }
            PollOutcome::NotAvailable => {
                idle_spins += 1;
                if last_seqno >= EVENT_COUNT {
                    break;
                }
                if idle_spins > 5_000_000 {
                    break;
                }
                std::hint::spin_loop();
            }
        }
    }

    log!("[READER] observed={observed} lost={lost} last_seqno={last_seqno}");

    assert_eq!(last_seqno, EVENT_COUNT, "reader must catch up to the writer's final seqno");
    let capacity = 1u64 << DESCRIPTOR_SHIFT;
    let slack = capacity / 100; // small constant slack
    assert!(
        observed + slack >= capacity.min(EVENT_COUNT),
        "too many events missed: observed={observed}, capacity={capacity}"
    );
}

const ENV_ROLE_GAP: &str = "EVENTRING_E2E_GAP_ROLE";
const GAP_EVENT_COUNT: u64 = 500_000;
const GAP_DESCRIPTOR_SHIFT: u32 = 16; // capacity 65536, far below GAP_EVENT_COUNT
const GAP_PAYLOAD_SHIFT: u32 = 27;

fn run_gap_writer(path: &str) {
    let size = init_size(GAP_DESCRIPTOR_SHIFT, GAP_PAYLOAD_SHIFT, 0).unwrap();
    let total = eventring_core::calc_storage(&size);
    let file = eventring_mmap::create_sized_file(path, total).unwrap();
    unsafe {
        init_file(&size, ContentTypeId::DEMO.0, [0u8; 32], file.as_raw_fd(), 0).unwrap();
    }
    let handle =
        unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadWrite, None).unwrap() };
    let mut recorder = Recorder::new(&handle).unwrap();

    log!("[GAP-WRITER] recording {GAP_EVENT_COUNT} events as fast as possible");
    let payload = [0x11u8; 32];
    for i in 0..GAP_EVENT_COUNT {
        recorder.record(2, &payload, [i, 0, 0, 0]);
    }
    log!("[GAP-WRITER] done");
}

fn run_gap_reader(path: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let file = loop {
        match eventring_mmap::open_ro_file(path) {
            Ok(f) => break f,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("[GAP-READER] failed to open ring file: {e}"),
        }
    };
    let handle = loop {
        match unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadOnly, None) } {
            Ok(h) => break h,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("[GAP-READER] failed to map ring: {e}"),
        }
    };
    let mut reader = RingIterator::new_behind(&handle, GAP_EVENT_COUNT);

    // Deliberately slow: sleep between polls so the writer laps it.
    let mut lost_total: u64 = 0;
    let mut last_seqno = 0u64;
    let mut gaps_seen = 0u32;
    let read_deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < read_deadline && last_seqno < GAP_EVENT_COUNT {
        match reader.poll() {
            PollOutcome::Event(desc) => last_seqno = desc.seqno,
            PollOutcome::Gap { lost, resumed_seqno } => {
                lost_total += lost;
                last_seqno = resumed_seqno - 1;
                gaps_seen += 1;
            }
            PollOutcome::NotAvailable => {
                std::thread::sleep(Duration::from_micros(50));
            }
        }
    }

    log!("[GAP-READER] last_seqno={last_seqno} lost_total={lost_total} gaps_seen={gaps_seen}");
    assert_eq!(last_seqno, GAP_EVENT_COUNT, "reader must eventually catch up");
    assert!(lost_total > 0, "a deliberately slow reader against a 65536-slot ring must lose events");
}

#[test]
fn e2e_two_process_gap_detection() {
    if let Ok(role) = env::var(ENV_ROLE_GAP) {
        let path = env::var(ENV_PATH).expect("EVENTRING_E2E_PATH not set");
        match role.as_str() {
            ROLE_WRITER => run_gap_writer(&path),
            ROLE_READER => run_gap_reader(&path),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let path = test_path("gap_detection");
    let exe = env::current_exe().expect("failed to get current executable path");

    let mut writer_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_gap_detection")
        .env(ENV_ROLE_GAP, ROLE_WRITER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn writer process");

    std::thread::sleep(Duration::from_millis(20));

    let mut reader_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_gap_detection")
        .env(ENV_ROLE_GAP, ROLE_READER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn reader process");

    let writer_status = writer_proc.wait().expect("failed to wait for writer");
    let reader_status = reader_proc.wait().expect("failed to wait for reader");

    let _ = std::fs::remove_file(&path);

    assert!(writer_status.success(), "gap writer process failed: {writer_status}");
    assert!(reader_status.success(), "gap reader process failed: {reader_status}");
}

#[test]
fn e2e_two_process_cross_process_concurrency() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let path = env::var(ENV_PATH).expect("EVENTRING_E2E_PATH not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&path),
            ROLE_READER => run_reader(&path),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let path = test_path("cross_process");
    let exe = env::current_exe().expect("failed to get current executable path");

    log!("[ORCHESTRATOR] spawning writer");
    let mut writer_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_cross_process_concurrency")
        .env(ENV_ROLE, ROLE_WRITER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn writer process");

    std::thread::sleep(Duration::from_millis(20));

    log!("[ORCHESTRATOR] spawning reader");
    let mut reader_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_cross_process_concurrency")
        .env(ENV_ROLE, ROLE_READER)
        .env(ENV_PATH, &path)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn reader process");

    let writer_status = writer_proc.wait().expect("failed to wait for writer");
    let reader_status = reader_proc.wait().expect("failed to wait for reader");

    let _ = std::fs::remove_file(&path);

    assert!(writer_status.success(), "writer process failed: {writer_status}");
    assert!(reader_status.success(), "reader process failed: {reader_status}");
}
