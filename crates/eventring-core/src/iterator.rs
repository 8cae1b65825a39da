//! Consumer side: read descriptors by sequence number, get a zero-copy
//! payload pointer, and verify non-expiration via the window.
//!
//! `payload_memcpy`'s copy-then-revalidate double-check is the only way to
//! consume a payload soundly: a single pre-copy check leaves a race where
//! the writer wraps and overwrites the source bytes mid-copy.

use std::sync::atomic::Ordering;

use crate::layout;
use crate::mapping::{self, RingHandle};
use crate::shm_layout::DescriptorBody;

/// A reader's local, validated copy of one descriptor: the slot's published
/// `seqno` plus the fields the writer filled in before publishing it.
#[derive(Debug, Clone, Copy)]
pub struct EventDescriptor {
    pub seqno: u64,
    pub event_type: u16,
    pub payload_size: u32,
    pub record_epoch_nanos: u64,
    pub payload_buf_offset: u64,
    pub content_ext: [u64; 4],
}

/// Result of polling for the next sequential event.
pub enum PollOutcome {
    /// No new event has been published since the cursor.
    NotAvailable,
    /// The next event in sequence.
    Event(EventDescriptor),
    /// The writer lapped the reader: `lost` events before `resumed_seqno`
    /// were overwritten before this reader could observe them. The cursor
    /// has been advanced to `resumed_seqno`; there is no recovery.
    Gap { lost: u64, resumed_seqno: u64 },
}

/// The reader side of a ring. Any number of iterators may exist
/// concurrently, in any process with the ring mapped; none of them mutate
/// the ring.
pub struct Iterator<'a> {
    handle: &'a RingHandle,
    desc_mask: u64,
    payload_mask: u64,
    payload_buf_size: u64,
    cursor: u64,
}

impl<'a> Iterator<'a> {
    /// Positions the cursor at the most recently produced event
    /// (`init_iterator`): reads `last_seqno` with acquire ordering.
    pub fn new(handle: &'a RingHandle) -> Self {
        let size = handle.size();
        Self {
            handle,
            desc_mask: size.descriptor_mask(),
            payload_mask: size.payload_mask(),
            payload_buf_size: size.payload_buf_size,
            cursor: mapping::load_last_seqno(handle),
        }
    }

    /// Positions the cursor `back` events behind the current `last_seqno`,
    /// clamped to at least 1. Slots older than the ring's descriptor
    /// capacity may return stale (overwritten-and-rewritten) data — a caveat
    /// of reading "from the beginning" on a wrapped ring.
    pub fn new_behind(handle: &'a RingHandle, back: u64) -> Self {
        let last = mapping::load_last_seqno(handle);
        let size = handle.size();
        Self {
            handle,
            desc_mask: size.descriptor_mask(),
            payload_mask: size.payload_mask(),
            payload_buf_size: size.payload_buf_size,
            cursor: last.saturating_sub(back).max(1).saturating_sub(1),
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Reads the descriptor published with sequence number `s`, verifying
    /// the publication witness. Returns `None` if `s == 0`, if it hasn't
    /// been produced yet, or if the slot has since been lapped by a later
    /// sequence number.
    pub fn try_copy(&self, s: u64) -> Option<EventDescriptor> {
        if s == 0 {
            return None;
        }
        let idx = layout::seq_to_index(s, self.desc_mask);
        let slot = self.handle.descriptor_slot_ptr(idx);

        // Read the body first, then the seqno witness: if the witness
        // confirms `s`, everything we just read happens-before that store.
        let body = unsafe { (*slot).body.as_ptr().read() };
        let loaded = unsafe { (*slot).seqno.load(Ordering::Acquire) };
        if loaded != s {
            return None;
        }

        Some(descriptor_from_body(s, &body))
    }

    /// Advances the cursor by one and reports what happened: the next
    /// event, no event yet, or evidence that this reader was lapped.
    pub fn poll(&mut self) -> PollOutcome {
        let want = self.cursor + 1;
        if let Some(desc) = self.try_copy(want) {
            self.cursor = want;
            return PollOutcome::Event(desc);
        }

        let idx = layout::seq_to_index(want, self.desc_mask);
        let slot = self.handle.descriptor_slot_ptr(idx);
        let loaded = unsafe { (*slot).seqno.load(Ordering::Acquire) };
        if loaded > want {
            let lost = loaded - want;
            self.cursor = loaded - 1;
            PollOutcome::Gap {
                lost,
                resumed_seqno: loaded,
            }
        } else {
            PollOutcome::NotAvailable
        }
    }

    /// Zero-copy pointer to `desc`'s payload start. May alias live writer
    /// memory; callers must `payload_check`/`payload_memcpy` to know
    /// whether it is still valid.
    pub fn payload_peek(&self, desc: &EventDescriptor) -> *const u8 {
        let start = desc.payload_buf_offset & self.payload_mask;
        unsafe { self.handle.payload_base().add(start as usize) }
    }

    /// The expiration test: true iff `desc`'s payload has not yet been
    /// physically overwritten, as of the most recently observed window.
    pub fn payload_check(&self, desc: &EventDescriptor) -> bool {
        desc.payload_buf_offset >= mapping::load_window_start(self.handle)
    }

    /// Copies up to `dst.len()` payload bytes for `desc` into `dst`,
    /// double-checking the window before and after the copy. The second
    /// check is required: the writer may wrap and overwrite the source
    /// bytes while the copy is in flight, and only re-checking after
    /// catches that.
    pub fn payload_memcpy(&self, desc: &EventDescriptor, dst: &mut [u8]) -> Option<()> {
        if !self.payload_check(desc) {
            return None;
        }

        let n = dst.len().min(desc.payload_size as usize);
        let start = desc.payload_buf_offset & self.payload_mask;
        let base = self.handle.payload_base();
        let first_len = ((self.payload_buf_size - start) as usize).min(n);
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(start as usize), dst.as_mut_ptr(), first_len);
            if first_len < n {
                std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first_len), n - first_len);
            }
        }

        if !self.payload_check(desc) {
            return None;
        }
        Some(())
    }
}

fn descriptor_from_body(seqno: u64, body: &DescriptorBody) -> EventDescriptor {
    EventDescriptor {
        seqno,
        event_type: body.event_type,
        payload_size: body.payload_size,
        record_epoch_nanos: body.record_epoch_nanos,
        payload_buf_offset: body.payload_buf_offset,
        content_ext: body.content_ext,
    }
}
