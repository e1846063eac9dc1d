//! A single reassembly group's bitmaps, staged XOR payloads, and the
//! cascading insert procedure.
//!
//! This is the receiver-side counterpart to `aeronet_transport::frag`'s
//! `FragmentReceiver`/`MessageBuf`, except reassembly here also has to
//! reconcile two interleaved bitmaps (sequence vs. staged parity) instead
//! of one, per `spec.md` §3/§4.2.

use std::collections::VecDeque;

use bit_vec::BitVec;

use crate::{
    error::InsertError,
    header::{FragmentHeader, PROTOCOL_SEQ, PROTOCOL_XOR},
};

/// One fragment's worth of work still to be placed into a group, either
/// because it just arrived off the wire or because placing a neighbor
/// discharged a staged XOR payload and revealed it.
///
/// Used as the explicit work queue inside [`ReassemblyGroup::insert`],
/// which keeps the cascading recovery described in `spec.md` §4.2
/// iterative rather than recursive (see `spec.md` §9).
#[derive(Debug, Clone)]
struct PendingInsert {
    protocol_id: u8,
    block_index: u32,
    block_pos: u32,
    payload: Vec<u8>,
}

/// Receiver-side state for a single in-flight message.
///
/// `group_index`, `group_bytes`, and `need_block_count` are fixed at
/// creation (on the first accepted fragment of the group) and never change
/// afterwards; [`ReassemblyGroup::matches_head`] is how `crate::unify`
/// enforces that.
#[derive(Debug, Clone)]
pub struct ReassemblyGroup {
    pub group_index: u64,
    pub group_bytes: u32,
    pub need_block_count: u32,
    pub recv_block_count: u32,
    seq_bitmap: BitVec,
    xor_bitmap: BitVec,
    group_data: Vec<u8>,
    /// The common fragment width (`max_payload` on the sender), learned from
    /// the first fragment seen whose own width reveals it: any non-last
    /// sequence fragment (its `block_bytes` *is* that width), or any XOR
    /// fragment at all (its wire payload is always padded to that width,
    /// regardless of which index it sits at). Every fragment's `block_pos`
    /// advances by exactly this width except the step past the very last
    /// index, which also advances by it (only the last fragment's *real*
    /// byte count is shorter, not its position stride) — so once known,
    /// this is the only width cascading recovery ever needs.
    frag_width: Option<u32>,
}

impl ReassemblyGroup {
    /// Creates a group from the first fragment seen for a `group_index`,
    /// inserting that fragment immediately.
    pub fn new(header: &FragmentHeader, payload: &[u8]) -> Self {
        let need_block_count = header.block_count;
        let mut group = Self {
            group_index: header.group_index,
            group_bytes: header.group_bytes,
            need_block_count,
            recv_block_count: 0,
            seq_bitmap: BitVec::from_elem(need_block_count as usize, false),
            xor_bitmap: BitVec::from_elem(need_block_count as usize, false),
            group_data: vec![0u8; header.group_bytes as usize],
            frag_width: None,
        };

        if header.is_xor() {
            group.learn_width(payload.len() as u32);
        } else if !header.is_last() {
            group.learn_width(header.block_bytes);
        }

        let required = header.block_pos as usize + payload.len();
        if group.group_data.len() < required {
            group.group_data.resize(required, 0);
        }

        if header.is_seq() {
            group.seq_bitmap.set(header.block_index as usize, true);
            group.recv_block_count = 1;
        } else {
            group.xor_bitmap.set(header.block_index as usize, true);
        }
        group.group_data[header.block_pos as usize..required].copy_from_slice(payload);

        group
    }

    /// Records the common fragment width the first time it becomes knowable,
    /// growing `group_data` (zero-filled) so every `frag_width`-wide slice up
    /// to the last index is always in bounds, with the portion past a short
    /// final fragment's real length reading back as zero — matching the
    /// zero-padding the encoder used when building XOR parity.
    fn learn_width(&mut self, width: u32) {
        if self.frag_width.is_some() || width == 0 {
            return;
        }
        self.frag_width = Some(width);
        let spanned = self.need_block_count as usize * width as usize;
        if self.group_data.len() < spanned {
            self.group_data.resize(spanned, 0);
        }
    }

    /// `true` if `header` describes the same group this was created from.
    #[must_use]
    pub fn matches_head(&self, header: &FragmentHeader) -> bool {
        self.group_index == header.group_index
            && self.group_bytes == header.group_bytes
            && self.need_block_count == header.block_count
    }

    /// `true` once every sequence fragment has been received or recovered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.recv_block_count == self.need_block_count
    }

    /// Consumes this group, trimming the data buffer to exactly
    /// `group_bytes` (per `spec.md` §3's stored-length policy).
    ///
    /// Used both for a fully-complete group and for a fault-tolerant
    /// partial delivery (where untouched bytes stay zero-filled).
    #[must_use]
    pub fn into_message(mut self) -> Vec<u8> {
        self.group_data.resize(self.group_bytes as usize, 0);
        self.group_data
    }

    /// Runs the Insert Procedure for a freshly-arrived fragment at
    /// `header.block_index`, recursively (via an explicit work queue, not
    /// the call stack) discharging any staged XOR payloads that this
    /// insertion enables on either neighbor.
    ///
    /// # Errors
    ///
    /// Returns the [`InsertError`] that applies to the fragment actually
    /// passed in. Cascaded recoveries triggered by this insert cannot fail
    /// by construction (they are only enqueued once the target index is
    /// known to be missing), so only the first fragment's outcome is ever
    /// reported.
    pub fn insert(&mut self, header: &FragmentHeader, payload: &[u8]) -> Result<(), InsertError> {
        let mut queue = VecDeque::new();
        queue.push_back(PendingInsert {
            protocol_id: header.protocol_id,
            block_index: header.block_index,
            block_pos: header.block_pos,
            payload: payload.to_vec(),
        });

        let mut outcome = None;
        while let Some(item) = queue.pop_front() {
            let result = self.place_one(&item, &mut queue);
            if outcome.is_none() {
                outcome = Some(result);
            } else {
                debug_assert!(
                    result.is_ok(),
                    "a cascaded recovery should never itself be rejected"
                );
            }
        }
        outcome.expect("queue always starts with at least one item")
    }

    fn place_one(
        &mut self,
        item: &PendingInsert,
        queue: &mut VecDeque<PendingInsert>,
    ) -> Result<(), InsertError> {
        let i = item.block_index as usize;

        // Capture the width as known *before* this item, so a just-arrived
        // fragment can never use its own (possibly forged) payload length to
        // validate its own `block_pos` — only a width established by an
        // earlier, already-placed fragment counts.
        let width_before = self.frag_width;

        // Learn the common width before doing any recovery arithmetic this
        // call might need: a non-last sequence fragment's own length, or
        // any XOR fragment's (always-padded) payload length, reveal it.
        if item.protocol_id == PROTOCOL_XOR {
            self.learn_width(item.payload.len() as u32);
        } else if i + 1 < self.need_block_count as usize {
            self.learn_width(item.payload.len() as u32);
        }
        // Falls back to this item's own length only if genuinely still
        // unknown (possible only when this is a lone short last fragment
        // with no XOR neighbor ever seen, in which case no cascade below
        // can trigger anyway, so the fallback is never actually read).
        let width = self.frag_width.unwrap_or(item.payload.len() as u32) as usize;

        // Every honestly-encoded fragment's `block_pos` is exactly
        // `block_index * frag_width` (every fragment preceding it is full
        // width, last one included, since only the final index is ever
        // short). Reject anything else rather than letting a forged
        // `block_pos` drive the neighbor-offset subtraction/addition below
        // out of bounds.
        if let Some(known_width) = width_before {
            let expected = u64::from(item.block_index) * u64::from(known_width);
            if u64::from(item.block_pos) != expected {
                return Err(InsertError::PositionMismatch {
                    index: item.block_index,
                    block_pos: item.block_pos,
                    expected,
                });
            }
        }

        if item.protocol_id == PROTOCOL_SEQ {
            if self.seq_bitmap[i] {
                return Err(InsertError::DuplicateSeq {
                    index: item.block_index,
                });
            }

            if i > 0 && self.xor_bitmap[i] {
                let prev_pos = checked_prev_pos(item.block_index, item.block_pos, width)?;
                let recovered = self.xor_recover(item.block_pos as usize, width, &item.payload);
                self.xor_bitmap.set(i, false);
                queue.push_back(PendingInsert {
                    protocol_id: PROTOCOL_SEQ,
                    block_index: item.block_index - 1,
                    block_pos: prev_pos,
                    payload: recovered,
                });
            }

            self.recv_block_count += 1;
            self.xor_bitmap.set(i, false);
            self.seq_bitmap.set(i, true);
            self.write_payload(item.block_pos, &item.payload);

            let next = i + 1;
            if next < self.need_block_count as usize && self.xor_bitmap[next] {
                let next_pos = item.block_pos as usize + width;
                let recovered = self.xor_recover(next_pos, width, &item.payload);
                self.xor_bitmap.set(next, false);
                queue.push_back(PendingInsert {
                    protocol_id: PROTOCOL_SEQ,
                    block_index: item.block_index + 1,
                    block_pos: next_pos as u32,
                    payload: recovered,
                });
            }

            Ok(())
        } else {
            if i == 0 {
                return Err(InsertError::NothingToRecover {
                    index: item.block_index,
                });
            }
            if self.xor_bitmap[i] {
                return Err(InsertError::DuplicateXor {
                    index: item.block_index,
                });
            }

            let pre = i - 1;
            if self.seq_bitmap[i] {
                if self.seq_bitmap[pre] {
                    return Err(InsertError::NothingToRecover {
                        index: item.block_index,
                    });
                }
                let prev_pos = checked_prev_pos(item.block_index, item.block_pos, width)?;
                let recovered = self.xor_recover(item.block_pos as usize, width, &item.payload);
                queue.push_back(PendingInsert {
                    protocol_id: PROTOCOL_SEQ,
                    block_index: item.block_index - 1,
                    block_pos: prev_pos,
                    payload: recovered,
                });
                Ok(())
            } else if self.seq_bitmap[pre] {
                let pre_pos = checked_prev_pos(item.block_index, item.block_pos, width)? as usize;
                let recovered = self.xor_recover(pre_pos, width, &item.payload);
                queue.push_back(PendingInsert {
                    protocol_id: PROTOCOL_SEQ,
                    block_index: item.block_index,
                    block_pos: item.block_pos,
                    payload: recovered,
                });
                Ok(())
            } else {
                self.xor_bitmap.set(i, true);
                self.write_payload(item.block_pos, &item.payload);
                Ok(())
            }
        }
    }

    fn write_payload(&mut self, block_pos: u32, payload: &[u8]) {
        let start = block_pos as usize;
        let end = start + payload.len();
        if self.group_data.len() < end {
            self.group_data.resize(end, 0);
        }
        self.group_data[start..end].copy_from_slice(payload);
    }

    /// Recovers a neighbor's `width` bytes by XORing the bytes already
    /// staged in `group_data` at `pos` against `other`, treating `other` as
    /// zero-padded if it is shorter than `width` (true of a short last
    /// fragment acting as the known side of the XOR).
    ///
    /// `group_data` is always pre-grown to `need_block_count * frag_width`
    /// once [`ReassemblyGroup::learn_width`] runs, so bytes past a short
    /// final fragment's real length read back as the zero the encoder
    /// padded with, exactly reproducing the padded operand it XORed.
    fn xor_recover(&self, pos: usize, width: usize, other: &[u8]) -> Vec<u8> {
        let end = (pos + width).min(self.group_data.len());
        let mut recovered = vec![0u8; width];
        recovered[..end - pos].copy_from_slice(&self.group_data[pos..end]);
        for (byte, o) in recovered.iter_mut().zip(other) {
            *byte ^= o;
        }
        recovered
    }
}

/// Computes the predecessor fragment's byte offset (`block_index - 1`'s
/// `block_pos`), i.e. `block_pos - width`, without underflowing.
///
/// The `PositionMismatch` check in [`ReassemblyGroup::place_one`] already
/// guarantees `block_pos == block_index * width` for every fragment that
/// reaches this point, which makes this subtraction exact and in-range by
/// construction; this still reports a typed error instead of wrapping or
/// panicking if that invariant were ever violated, rather than trusting the
/// caller's arithmetic blindly.
fn checked_prev_pos(block_index: u32, block_pos: u32, width: usize) -> Result<u32, InsertError> {
    let width = width as u32;
    block_pos.checked_sub(width).ok_or(InsertError::PositionMismatch {
        index: block_index,
        block_pos,
        expected: u64::from(block_index.saturating_sub(1)) * u64::from(width),
    })
}
