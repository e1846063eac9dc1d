//! Error taxonomy for header parsing, frame admission, and fragment
//! insertion.
//!
//! None of these propagate past the public [`crate::Unifier`]/
//! [`crate::Divider`] API — they exist so that rejections can be logged
//! with a concrete reason (see `tracing` call sites in [`crate::unify`]),
//! matching how `aeronet_transport::recv::RecvError` is used internally.

use derive_more::{Display, Error};

/// A frame's header could not be decoded or failed a structural check
/// that does not depend on any reassembly state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum HeaderError {
    /// Frame is shorter than [`crate::header::HEADER_SIZE`].
    #[display("frame of {len} bytes is shorter than the header")]
    TooShort {
        /// Length of the frame that was rejected.
        len: usize,
    },
    /// `protocol_id` was neither `0xE9` nor `0xEA`.
    #[display("unknown protocol id 0x{protocol_id:02x}")]
    UnknownProtocol {
        /// The rejected byte.
        protocol_id: u8,
    },
    /// An XOR fragment claimed `block_index == 0`.
    #[display("xor fragment cannot be at block index 0")]
    XorAtZero,
    /// `block_index >= block_count`.
    #[display("block index {block_index} is out of range for block count {block_count}")]
    IndexOutOfRange {
        /// The out-of-range index.
        block_index: u32,
        /// The group's declared fragment count.
        block_count: u32,
    },
    /// The frame length disagreed with the declared `block_bytes` /
    /// `block_pos` / `group_bytes` per the last-fragment-aware size rule.
    #[display("frame length {frame_len} is inconsistent with declared sizes")]
    SizeMismatch {
        /// Actual length of the frame as received.
        frame_len: usize,
    },
}

/// A structurally valid frame was rejected by Phase A/B of [`crate::Unifier::decode`]
/// because of group-level state, not the header alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum AdmitError {
    /// `group_index < min_group_index`: the group has already been
    /// delivered or retired.
    #[display("group {group_index} is stale, minimum accepted is {min_group_index}")]
    StaleGroup {
        /// The rejected frame's group.
        group_index: u64,
        /// The smallest group index still accepted.
        min_group_index: u64,
    },
    /// Header fields disagree with the already-stored group head.
    #[display("group {group_index} header mismatch against stored group head")]
    GroupMismatch {
        /// The group in question.
        group_index: u64,
    },
    /// The group has already received every fragment it needs.
    #[display("group {group_index} is already complete")]
    GroupComplete {
        /// The group in question.
        group_index: u64,
    },
}

/// [`crate::Divider::encode`] could not split a message into fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ConfigError {
    /// The message to encode was empty.
    #[display("message to encode must not be empty")]
    EmptyMessage,
    /// `max_block_size` leaves no room for any payload past the header.
    #[display("max block size {max_block_size} leaves no room for a header")]
    BlockSizeTooSmall {
        /// The configured block size.
        max_block_size: u32,
    },
    /// The message would split into more fragments than a 24-bit block
    /// index can represent.
    #[display("message would require {block_count} fragments, more than the {max} allowed")]
    TooManyFragments {
        /// Fragments the message would require.
        block_count: u64,
        /// Largest representable `block_count`.
        max: u32,
    },
}

/// A fragment could not be placed into an already-admitted group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum InsertError {
    /// A sequence fragment at this index has already been recorded.
    #[display("duplicate sequence fragment at index {index}")]
    DuplicateSeq {
        /// The duplicate fragment's index.
        index: u32,
    },
    /// An XOR fragment at this index has already been recorded.
    #[display("duplicate xor fragment at index {index}")]
    DuplicateXor {
        /// The duplicate fragment's index.
        index: u32,
    },
    /// An XOR fragment arrived at an index whose neighbors are both already
    /// known, so it carries no recoverable information.
    #[display("xor fragment at index {index} has nothing left to recover")]
    NothingToRecover {
        /// The fragment's index.
        index: u32,
    },
    /// `block_pos` disagrees with `block_index * frag_width`, the only
    /// value the wire protocol ever produces honestly once the group's
    /// common fragment width is known. Rejected rather than trusted, since
    /// neighbor-recovery arithmetic derives an adjacent fragment's offset by
    /// adding or subtracting `frag_width` from this field.
    #[display("block index {index} declares block_pos {block_pos}, expected {expected}")]
    PositionMismatch {
        /// The fragment's index.
        index: u32,
        /// The offset the fragment actually declared.
        block_pos: u32,
        /// The offset `index * frag_width` would imply.
        expected: u64,
    },
}
