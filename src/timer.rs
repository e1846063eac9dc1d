//! Monotonic clock usage and the per-group expiry deadline queue.
//!
//! `spec.md` §4.2 calls this "the deadline sweep"; `aeronet_transport` has
//! no direct equivalent (it relies on RTT-driven retransmission timers,
//! see `rtt.rs`), so this module is grounded in the *shape* of the
//! original C++ `groups_t::decode_timer_list` (`original_source/src/
//! packet_xor.cpp`) translated into an idiomatic `VecDeque` of `Instant`s
//! instead of the original's hand-rolled seconds/microseconds pair with
//! manual carry arithmetic.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Computes the expiry deadline for a freshly-created group.
///
/// Per `spec.md` §4.2: `now + max_delay * (need_block_count / 100 + 1)` —
/// larger groups get proportionally more latitude before they expire.
#[must_use]
pub fn deadline_for(now: Instant, max_delay: Duration, need_block_count: u32) -> Instant {
    let scale = need_block_count / 100 + 1;
    now + max_delay * scale
}

/// Insertion-ordered queue of `(group_index, deadline)` pairs.
///
/// Insertion order equals deadline order, since deadlines are always
/// assigned using the then-current time plus a positive offset (see
/// [`deadline_for`]) — so the front of the queue is always the
/// soonest-expiring still-tracked group.
#[derive(Debug, Default)]
pub struct TimerWheel {
    entries: VecDeque<(u64, Instant)>,
}

impl TimerWheel {
    /// Creates an empty timer wheel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends a new deadline. Must be called with a deadline no earlier
    /// than every deadline already pushed, or the queue's ordering
    /// invariant breaks.
    pub fn push(&mut self, group_index: u64, deadline: Instant) {
        self.entries.push_back((group_index, deadline));
    }

    /// Peeks the soonest-expiring entry without removing it.
    #[must_use]
    pub fn front(&self) -> Option<(u64, Instant)> {
        self.entries.front().copied()
    }

    /// Removes and returns the soonest-expiring entry.
    pub fn pop_front(&mut self) -> Option<(u64, Instant)> {
        self.entries.pop_front()
    }

    /// Removes a specific group's timer entry, wherever it sits in the
    /// queue. Used when a group is evicted out of deadline order (e.g. by
    /// an open-group capacity limit) so the queue never holds a stale
    /// entry for a group that no longer exists.
    pub fn remove(&mut self, group_index: u64) {
        if let Some(pos) = self.entries.iter().position(|&(g, _)| g == group_index) {
            self.entries.remove(pos);
        }
    }

    /// Discards every tracked deadline.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
