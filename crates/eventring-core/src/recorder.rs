//! Single-producer recording: the eight-step reservation protocol — claim a
//! descriptor slot and a payload extent, advance the expiry window, write
//! the payload (splitting across the wrap boundary if needed), fill the
//! descriptor body, and publish the sequence number last with a release
//! store. That store is the event's linearization point.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{RecordErrorKind, RecordErrorPayload, RECORD_ERROR_EVENT_TYPE};
use crate::layout::{self, EVENT_PAYLOAD_ALIGN, WINDOW_INCR};
use crate::mapping::{self, RingHandle};
use crate::shm_layout::DescriptorBody;

/// The writer side of a ring. There is exactly one of these per ring in a
/// process group — `RingHandle` itself is `Sync` (any number of readers may
/// share one mapping across threads), so `Recorder` carries a
/// `PhantomData<Cell<()>>` to opt back out of `Sync`: the single-writer
/// invariant is enforced by the type system, not just by documentation.
pub struct Recorder<'a> {
    handle: &'a RingHandle,
    desc_mask: u64,
    payload_mask: u64,
    payload_buf_size: u64,
    _not_sync: PhantomData<Cell<()>>,
}

/// Outcome of [`Recorder::reserve`].
pub enum Reserved {
    /// A real event slot was reserved; caller should fill `payload` then
    /// call [`Recorder::commit`].
    Slot {
        reservation: Reservation,
    },
    /// The request was too large to ever be readable; a `RECORD_ERROR`
    /// event was already published in its place. Nothing further to do.
    Dropped { seqno: u64, kind: RecordErrorKind },
}

/// A claimed descriptor slot and payload extent, not yet published.
pub struct Reservation {
    seqno: u64,
    event_type: u16,
    payload_size: u32,
    payload_buf_offset: u64,
    content_ext: [u64; 4],
}

impl Reservation {
    pub fn seqno(&self) -> u64 {
        self.seqno
    }
}

impl<'a> Recorder<'a> {
    /// Binds a recorder to a read-write ring handle.
    pub fn new(handle: &'a RingHandle) -> Result<Self, crate::error::EventRingError> {
        handle.require_writable()?;
        let size = handle.size();
        Ok(Self {
            handle,
            desc_mask: size.descriptor_mask(),
            payload_mask: size.payload_mask(),
            payload_buf_size: size.payload_buf_size,
            _not_sync: PhantomData,
        })
    }

    /// High-level convenience: reserve, copy `payload` into the ring
    /// (handling wrap-around), and commit in one call. Returns the
    /// published sequence number — of the real event, or of the in-band
    /// `RECORD_ERROR` event if the payload was dropped.
    pub fn record(&mut self, event_type: u16, payload: &[u8], content_ext: [u64; 4]) -> u64 {
        let payload_size = payload.len() as u64;
        match self.reserve(event_type, payload_size, content_ext) {
            Reserved::Slot { reservation } => {
                self.write_payload(reservation.payload_buf_offset, payload);
                self.commit(reservation)
            }
            Reserved::Dropped { seqno, .. } => seqno,
        }
    }

    /// Steps 1-5 of the reservation protocol: claim a descriptor slot and a
    /// payload extent, advance the window, and handle the two overflow
    /// cases by publishing a `RECORD_ERROR` event directly.
    pub fn reserve(&mut self, event_type: u16, payload_size: u64, content_ext: [u64; 4]) -> Reserved {
        // Step 1: reserve a descriptor slot.
        let seqno = self.handle.header().ctrl0.last_seqno.fetch_add(1, Ordering::Relaxed) + 1;

        // Step 2: reserve payload bytes, aligned.
        let base = self
            .handle
            .header()
            .ctrl0
            .next_payload_byte
            .load(Ordering::Relaxed);
        let off = layout::round_up(base, EVENT_PAYLOAD_ALIGN);
        let end = off + payload_size;
        self.handle
            .header()
            .ctrl0
            .next_payload_byte
            .store(end, Ordering::Relaxed);

        // Step 3: the 4 GiB overflow check happens before window advancement
        // and short-circuits it — the requested size is bogus for window
        // purposes, so `next_payload_byte` must not be used to advance
        // `buffer_window_start` yet.
        if payload_size > u32::MAX as u64 {
            // Nothing of the payload was ever going to be written at this
            // size, so there is no "trailing surviving portion" to report.
            return self.drop_with_error(seqno, RecordErrorKind::Overflow4Gb, event_type, off, 0, payload_size);
        }

        // Step 4: advance the window if a new WINDOW_INCR boundary was crossed.
        let window_before = mapping::load_window_start(self.handle);
        if (end >> 24) > (window_before >> 24) {
            let new_window = end.saturating_sub(self.payload_buf_size) + WINDOW_INCR;
            mapping::store_window_start(self.handle, new_window);
        }

        // Step 5: immediate-expiry check — payload so large it would be
        // overwritten before it could ever be published. `safe_trailing` is
        // the window's own span (`payload_buf_size - WINDOW_INCR`): the most
        // trailing bytes of any payload that could still sit inside the
        // window the instant it is published. This branch only triggers
        // when `payload_size` has already reached that span, so the min is
        // the span itself — the true count of bytes that would have stayed
        // readable, with the rest already overwritten at publish time.
        let safe_trailing = self.payload_buf_size.saturating_sub(WINDOW_INCR);
        if payload_size >= safe_trailing {
            let truncated_payload_size = payload_size.min(safe_trailing) as u32;
            return self.drop_with_error(
                seqno,
                RecordErrorKind::OverflowExpire,
                event_type,
                off,
                truncated_payload_size,
                payload_size,
            );
        }

        Reserved::Slot {
            reservation: Reservation {
                seqno,
                event_type,
                payload_size: payload_size as u32,
                payload_buf_offset: off,
                content_ext,
            },
        }
    }

    /// Publishes a `RECORD_ERROR` event in place of a dropped reservation
    /// (steps 3/5's error paths): writes the fixed error payload at the
    /// already-claimed offset `off` and publishes it under the already-claimed
    /// `seqno`, instead of the original event.
    fn drop_with_error(
        &self,
        seqno: u64,
        kind: RecordErrorKind,
        discarded_event_type: u16,
        off: u64,
        truncated_payload_size: u32,
        requested_payload_size: u64,
    ) -> Reserved {
        let error_payload = RecordErrorPayload::new(
            kind,
            discarded_event_type,
            truncated_payload_size,
            requested_payload_size,
        );
        let bytes = error_payload.as_bytes();
        self.write_payload(off, &bytes);
        let reservation = Reservation {
            seqno,
            event_type: RECORD_ERROR_EVENT_TYPE,
            payload_size: bytes.len() as u32,
            payload_buf_offset: off,
            content_ext: [0; 4],
        };
        self.publish(&reservation);
        Reserved::Dropped { seqno, kind }
    }

    /// Copies `payload` into the payload buffer at unwrapped offset `off`,
    /// splitting into two contiguous ranges if it wraps (step 6).
    fn write_payload(&self, off: u64, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let start = off & self.payload_mask;
        let base = self.handle.payload_base();
        let first_len = ((self.payload_buf_size - start) as usize).min(payload.len());
        unsafe {
            std::ptr::copy_nonoverlapping(payload.as_ptr(), base.add(start as usize), first_len);
            if first_len < payload.len() {
                std::ptr::copy_nonoverlapping(
                    payload.as_ptr().add(first_len),
                    base,
                    payload.len() - first_len,
                );
            }
        }
    }

    /// Steps 7-8: fill the descriptor body, then publish `seqno` last with
    /// release ordering. This store is the event's linearization point.
    fn publish(&self, reservation: &Reservation) {
        let idx = layout::seq_to_index(reservation.seqno, self.desc_mask);
        let slot = self.handle.descriptor_slot_ptr(idx);
        let record_epoch_nanos = now_epoch_nanos();
        let body = DescriptorBody::new(
            reservation.event_type,
            reservation.payload_size,
            record_epoch_nanos,
            reservation.payload_buf_offset,
            reservation.content_ext,
        );
        unsafe {
            (*slot).body.as_mut_ptr().write(body);
            (*slot).seqno.store(reservation.seqno, Ordering::Release);
        }
    }

    /// Completes a reservation obtained from [`Recorder::reserve`], after
    /// the caller has filled the payload span. Returns the published
    /// sequence number.
    pub fn commit(&mut self, reservation: Reservation) -> u64 {
        let seqno = reservation.seqno;
        self.publish(&reservation);
        seqno
    }

    /// Mutable, possibly-wrapped access to a reserved payload span, for
    /// callers that want to fill it in place rather than go through
    /// [`Recorder::record`]'s copy.
    pub fn payload_span_mut(&mut self, reservation: &Reservation) -> PayloadSpan<'_> {
        let start = reservation.payload_buf_offset & self.payload_mask;
        let len = reservation.payload_size as u64;
        let base = self.handle.payload_base();
        let first_len = (self.payload_buf_size - start).min(len);
        unsafe {
            if first_len == len {
                PayloadSpan::Contiguous(std::slice::from_raw_parts_mut(
                    base.add(start as usize),
                    len as usize,
                ))
            } else {
                let head = std::slice::from_raw_parts_mut(base.add(start as usize), first_len as usize);
                let tail = std::slice::from_raw_parts_mut(base, (len - first_len) as usize);
                PayloadSpan::Split(head, tail)
            }
        }
    }
}

/// A reserved payload span, split across the wrap boundary if necessary.
pub enum PayloadSpan<'a> {
    Contiguous(&'a mut [u8]),
    Split(&'a mut [u8], &'a mut [u8]),
}

/// Wall-clock timestamp for `record_epoch_nanos` (see DESIGN.md's Open
/// Question resolution: wall-clock, not a monotonic clock, since every
/// process mapping the ring reads the same kernel clock).
fn now_epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileinit::init_file;
    use crate::iterator::Iterator as RingIterator;
    use crate::layout;
    use crate::mapping::RingHandle;
    use eventring_mmap::{create_sized_file, Protection};
    use std::os::unix::io::AsRawFd;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_path(label: &str) -> String {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        format!("/tmp/eventring_recorder_test_{label}_{ts}")
    }

    fn make_ring(label: &str, desc_shift: u32, buf_shift: u32) -> (String, RingHandle) {
        let size = layout::init_size(desc_shift, buf_shift, 0).unwrap();
        let total = layout::calc_storage(&size);
        let path = tmp_path(label);
        let file = create_sized_file(&path, total).unwrap();
        unsafe {
            init_file(&size, 42, [0u8; 32], file.as_raw_fd(), 0).unwrap();
        }
        let handle =
            unsafe { RingHandle::mmap(file.as_raw_fd(), 0, Protection::ReadWrite, None).unwrap() };
        (path, handle)
    }

    #[test]
    fn record_single_event_roundtrips() {
        let (path, handle) = make_ring("single_event", 16, 27);
        let mut recorder = Recorder::new(&handle).unwrap();

        let t_start = now_epoch_nanos();
        let seqno = recorder.record(2, &[0xDE, 0xAD, 0xBE, 0xEF], [0; 4]);
        let t_end = now_epoch_nanos();
        assert_eq!(seqno, 1);

        let mut reader = RingIterator::new(&handle);
        let desc = reader.try_copy(1).expect("event should be present");
        assert_eq!(desc.event_type, 2);
        assert_eq!(desc.payload_size, 4);
        assert!(desc.record_epoch_nanos >= t_start && desc.record_epoch_nanos <= t_end);

        let mut dst = [0u8; 4];
        reader.payload_memcpy(&desc, &mut dst).expect("payload should not be expired");
        assert_eq!(dst, [0xDE, 0xAD, 0xBE, 0xEF]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn oversized_payload_emits_record_error() {
        let (path, handle) = make_ring("oversize", 16, 27);
        let mut recorder = Recorder::new(&handle).unwrap();

        let seqno = recorder.reserve(5, 0x1_0000_0000, [0; 4]);
        let seqno = match seqno {
            Reserved::Dropped { seqno, kind } => {
                assert_eq!(kind, RecordErrorKind::Overflow4Gb);
                seqno
            }
            Reserved::Slot { .. } => panic!("expected oversized payload to be dropped"),
        };

        let mut reader = RingIterator::new(&handle);
        let desc = reader.try_copy(seqno).unwrap();
        assert_eq!(desc.event_type, RECORD_ERROR_EVENT_TYPE);

        let mut dst = [0u8; 16];
        reader.payload_memcpy(&desc, &mut dst).unwrap();
        let payload = RecordErrorPayload::from_bytes(dst);
        assert_eq!(payload.error_kind, RecordErrorKind::Overflow4Gb as u16);
        assert_eq!(payload.discarded_event_type, 5);
        assert_eq!(payload.requested_payload_size, 0x1_0000_0000);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn payload_too_large_for_window_emits_overflow_expire() {
        let (path, handle) = make_ring("overflow_expire", 16, 27); // 128 MiB payload buffer
        let mut recorder = Recorder::new(&handle).unwrap();

        let safe_trailing = (1u64 << 27) - layout::WINDOW_INCR;
        let requested = safe_trailing + 1000; // past the safe span, but well under 4 GiB
        let seqno = match recorder.reserve(6, requested, [0; 4]) {
            Reserved::Dropped { seqno, kind } => {
                assert_eq!(kind, RecordErrorKind::OverflowExpire);
                seqno
            }
            Reserved::Slot { .. } => panic!("expected oversized payload to be dropped"),
        };

        let mut reader = RingIterator::new(&handle);
        let desc = reader.try_copy(seqno).unwrap();
        assert_eq!(desc.event_type, RECORD_ERROR_EVENT_TYPE);

        let mut dst = [0u8; 16];
        reader.payload_memcpy(&desc, &mut dst).unwrap();
        let payload = RecordErrorPayload::from_bytes(dst);
        assert_eq!(payload.error_kind, RecordErrorKind::OverflowExpire as u16);
        assert_eq!(payload.discarded_event_type, 6);
        assert_eq!(payload.requested_payload_size, requested);
        // Only the window's own span of trailing bytes could ever have
        // stayed readable; the rest of `requested` was already overwritten
        // by the time this event published.
        assert_eq!(payload.truncated_payload_size as u64, safe_trailing);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wrap_around_expires_old_payload() {
        let (path, handle) = make_ring("wrap", 16, 27); // 128 MiB payload buffer
        let mut recorder = Recorder::new(&handle).unwrap();
        let mut reader = RingIterator::new(&handle);

        let first_seqno = recorder.record(3, &[1, 2, 3, 4], [0; 4]);
        let first_desc = reader.try_copy(first_seqno).unwrap();
        assert!(reader.payload_check(&first_desc));

        // Record ~130 MiB of 1 MiB events so the window must advance past
        // the first payload's offset.
        let chunk = vec![0xAAu8; 1024 * 1024];
        for _ in 0..130 {
            recorder.record(3, &chunk, [0; 4]);
        }

        assert!(!reader.payload_check(&first_desc));
        let mut dst = vec![0u8; first_desc.payload_size as usize];
        assert!(reader.payload_memcpy(&first_desc, &mut dst).is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn payload_span_mut_handles_wrap_split() {
        let (path, handle) = make_ring("span_split", 16, 27); // 128 MiB payload buffer
        let mut recorder = Recorder::new(&handle).unwrap();
        let mut reader = RingIterator::new(&handle);

        // Advance `next_payload_byte` to 20 bytes short of the buffer
        // boundary with two dummy reservations, each safely under the
        // immediate-expiry threshold, so the reservation below straddles
        // the wrap and `payload_span_mut` must return `PayloadSpan::Split`.
        let payload_buf_size = 1u64 << 27;
        let target = payload_buf_size - 20;
        let first_chunk = 100_000_000u64;
        recorder.record(3, &vec![0u8; first_chunk as usize], [0; 4]);
        recorder.record(3, &vec![0u8; (target - first_chunk) as usize], [0; 4]);

        let payload: Vec<u8> = (0..40u8).collect();
        let reservation = match recorder.reserve(4, payload.len() as u64, [0; 4]) {
            Reserved::Slot { reservation } => reservation,
            Reserved::Dropped { .. } => panic!("expected a real reservation, not a RECORD_ERROR"),
        };
        assert!(
            reservation.payload_buf_offset + payload.len() as u64 > payload_buf_size,
            "reservation should straddle the wrap boundary"
        );

        match recorder.payload_span_mut(&reservation) {
            PayloadSpan::Split(head, tail) => {
                let split = head.len();
                head.copy_from_slice(&payload[..split]);
                tail.copy_from_slice(&payload[split..]);
            }
            PayloadSpan::Contiguous(_) => panic!("expected the reservation to wrap and split"),
        }
        let seqno = recorder.commit(reservation);

        let desc = reader.try_copy(seqno).unwrap();
        let mut dst = vec![0u8; payload.len()];
        reader
            .payload_memcpy(&desc, &mut dst)
            .expect("payload should not be expired");
        assert_eq!(dst, payload);

        let _ = std::fs::remove_file(&path);
    }
}
