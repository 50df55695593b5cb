//! Ring holder: sizing policy, slot claiming, batched completion drain.
//!
//! Wraps `sys::RawRing` with the policies the proactor relies on: the
//! requested depth is rounded up to a power of two (0 means the 4096
//! default), claimed slots are zeroed before the caller prepares them,
//! and completions drain through a preallocated pointer batch of twice
//! the ring depth so a full completion queue fits in one sweep.

use uproar_core::{kinfo, Result, UringError};

use crate::structs::{CompletionEntry, SubmissionEntry};
use crate::sys::RawRing;

pub const DEFAULT_ENTRIES: u32 = 4096;
/// Kernel cap on submission queue depth.
pub const MAX_ENTRIES: u32 = 32768;

#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub entries: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { entries: DEFAULT_ENTRIES }
    }
}

/// Round a requested depth to what setup will be asked for.
pub fn effective_entries(requested: u32) -> u32 {
    if requested == 0 {
        return DEFAULT_ENTRIES;
    }
    // Clamp before rounding: next_power_of_two overflows above 2^31.
    requested.min(MAX_ENTRIES).next_power_of_two()
}

pub struct RingHolder {
    ring: RawRing,
    entries: u32,
    scratch: Vec<*const u8>,
}

impl RingHolder {
    pub fn create(config: RingConfig) -> Result<Self> {
        let entries = effective_entries(config.entries);
        let ring = RawRing::setup(entries)?;
        kinfo!(
            "ring up: {} sq entries, {} cq entries",
            ring.sq_entries(),
            ring.cq_entries()
        );
        let scratch = vec![std::ptr::null(); 2 * entries as usize];
        Ok(Self { ring, entries, scratch })
    }

    pub fn entries(&self) -> u32 {
        self.entries
    }

    pub fn is_open(&self) -> bool {
        self.ring.is_open()
    }

    pub fn available_submission_space(&self) -> u32 {
        self.ring.sq_space_left()
    }

    /// Claim one submission slot, zero it, and let `init` fill it in.
    /// Returns false when the queue is full.
    pub fn claim_submission_slot<F>(&mut self, init: F) -> bool
    where
        F: FnOnce(&mut SubmissionEntry),
    {
        match self.ring.next_sqe() {
            Some(ptr) => {
                let mut entry = unsafe { SubmissionEntry::at(ptr) };
                entry.clear();
                init(&mut entry);
                true
            }
            None => false,
        }
    }

    /// Publish claimed slots to the kernel, optionally waiting for
    /// `wait_for` completions.
    pub fn flush_and_notify(&mut self, wait_for: u32) -> Result<u32> {
        if !self.ring.is_open() {
            return Err(UringError::RingClosed);
        }
        self.ring.flush(wait_for)
    }

    /// Consume every ready completion through `f`. The queue cursor only
    /// moves when something was ready.
    pub fn drain_completions<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&CompletionEntry),
    {
        let n = self.ring.peek_batch_cqe(&mut self.scratch);
        if n == 0 {
            return 0;
        }
        let mut view = unsafe { CompletionEntry::at(self.scratch[0]) };
        for &ptr in &self.scratch[..n] {
            view.reposition(ptr);
            f(&view);
        }
        self.ring.cq_advance(n as u32);
        n
    }

    pub fn completions_ready(&self) -> u32 {
        self.ring.cq_ready()
    }

    /// Idempotent teardown.
    pub fn close(&mut self) {
        if self.ring.is_open() {
            kinfo!("ring down");
        }
        self.ring.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::opcode;

    fn try_holder(entries: u32) -> Option<RingHolder> {
        RingHolder::create(RingConfig { entries }).ok()
    }

    #[test]
    fn sizing_policy() {
        assert_eq!(effective_entries(0), 4096);
        assert_eq!(effective_entries(1), 1);
        assert_eq!(effective_entries(100), 128);
        assert_eq!(effective_entries(4096), 4096);
        assert_eq!(effective_entries(5000), 8192);
        assert_eq!(effective_entries(40_000), MAX_ENTRIES);
        // Requests past 2^31 must clamp, not overflow the rounding.
        assert_eq!(effective_entries(1 << 31), MAX_ENTRIES);
        assert_eq!(effective_entries(u32::MAX), MAX_ENTRIES);
    }

    #[test]
    fn claimed_slots_start_zeroed() {
        let Some(mut holder) = try_holder(4) else { return };
        let claimed = holder.claim_submission_slot(|sqe| {
            assert_eq!(sqe.opcode(), 0);
            assert_eq!(sqe.user_data(), 0);
            assert_eq!(sqe.flags(), 0);
            sqe.set_opcode(opcode::NOP);
            sqe.set_user_data(9);
        });
        assert!(claimed);
        assert_eq!(holder.available_submission_space(), holder.entries() - 1);
    }

    #[test]
    fn hundred_nops_complete_with_matching_ids() {
        let Some(mut holder) = try_holder(128) else { return };
        for i in 0..100u64 {
            let ok = holder.claim_submission_slot(|sqe| {
                sqe.set_opcode(opcode::NOP);
                sqe.set_fd(-1);
                sqe.set_user_data(i);
            });
            assert!(ok);
        }
        holder.flush_and_notify(100).unwrap();
        let mut seen = vec![false; 100];
        let drained = holder.drain_completions(|cqe| {
            assert_eq!(cqe.res(), 0);
            seen[cqe.user_data() as usize] = true;
        });
        assert_eq!(drained, 100);
        assert!(seen.iter().all(|&s| s));
        // Nothing ready, cursor must hold still.
        assert_eq!(holder.drain_completions(|_| panic!("no completions expected")), 0);
    }

    #[test]
    fn close_twice_is_fine() {
        let Some(mut holder) = try_holder(4) else { return };
        holder.close();
        assert!(!holder.is_open());
        holder.close();
        assert!(holder.flush_and_notify(0).is_err());
    }
}
