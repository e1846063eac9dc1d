//! Bit-exact encode/decode of the per-fragment wire header.
//!
//! The header is a fixed-width, big-endian, unpadded structure. This module
//! is deliberately "dumb": it knows how to turn a [`FragmentHeader`] into
//! bytes and back, and nothing about what those fields mean for reassembly.
//! Semantic validation (index bounds, size consistency, staleness) is
//! [`crate::unify`]'s job, mirroring how `aeronet_transport::packet::header`
//! is kept separate from `aeronet_transport::recv`'s admission checks.

use crate::error::HeaderError;

/// `protocol_id` value marking a fragment that carries original message
/// bytes.
pub const PROTOCOL_SEQ: u8 = 0xE9;
/// `protocol_id` value marking a fragment that carries XOR parity bytes.
pub const PROTOCOL_XOR: u8 = 0xEA;

/// Largest value a 24-bit fragment index (and therefore `block_count`) can
/// hold.
pub const MAX_BLOCK_COUNT: u32 = 0x00FF_FFFF;

/// Size in bytes of [`FragmentHeader`] on the wire.
///
/// `group_index` (8) + `protocol_id` (1) + `block_idx_h` (1) +
/// `block_idx_l` (2) + `block_count` (4) + `block_bytes` (4) +
/// `block_pos` (4) + `group_bytes` (4).
pub const HEADER_SIZE: usize = 28;

/// Per-fragment header, decoded into host byte order.
///
/// See `spec.md` §3 for the wire layout. Note that `block_index` here is
/// already the reassembled 24-bit composite of `block_idx_h`/`block_idx_l`;
/// use [`FragmentHeader::encode`] to split it back into the two wire fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct FragmentHeader {
    /// Monotonic sender-assigned identifier of the message this fragment
    /// belongs to.
    pub group_index: u64,
    /// Either [`PROTOCOL_SEQ`] or [`PROTOCOL_XOR`].
    pub protocol_id: u8,
    /// Index of this fragment within its group, `< block_count`.
    pub block_index: u32,
    /// Total number of sequence fragments in the group.
    pub block_count: u32,
    /// Payload length carried by this fragment.
    pub block_bytes: u32,
    /// Byte offset of this fragment's payload within the reassembled
    /// message.
    pub block_pos: u32,
    /// Total reassembled message length.
    pub group_bytes: u32,
}

impl FragmentHeader {
    /// `true` if this header's `protocol_id` marks a sequence (data)
    /// fragment.
    #[must_use]
    pub const fn is_seq(&self) -> bool {
        self.protocol_id == PROTOCOL_SEQ
    }

    /// `true` if this header's `protocol_id` marks an XOR parity fragment.
    #[must_use]
    pub const fn is_xor(&self) -> bool {
        self.protocol_id == PROTOCOL_XOR
    }

    /// `true` if this is the last fragment in its group by index.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.block_index + 1 == self.block_count
    }

    /// Encodes this header into the first [`HEADER_SIZE`] bytes of `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is shorter than [`HEADER_SIZE`].
    pub fn encode(&self, dst: &mut [u8]) {
        let dst = &mut dst[..HEADER_SIZE];
        dst[0..8].copy_from_slice(&self.group_index.to_be_bytes());
        dst[8] = self.protocol_id;
        dst[9] = ((self.block_index >> 16) & 0xFF) as u8;
        dst[10..12].copy_from_slice(&((self.block_index & 0xFFFF) as u16).to_be_bytes());
        dst[12..16].copy_from_slice(&self.block_count.to_be_bytes());
        dst[16..20].copy_from_slice(&self.block_bytes.to_be_bytes());
        dst[20..24].copy_from_slice(&self.block_pos.to_be_bytes());
        dst[24..28].copy_from_slice(&self.group_bytes.to_be_bytes());
    }

    /// Decodes a header from the start of `src`, without validating any
    /// cross-field invariant.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::TooShort`] if `src` is shorter than
    /// [`HEADER_SIZE`]. Does not itself check `protocol_id` or index
    /// bounds — callers run [`FragmentHeader::validate`] next.
    pub fn decode(src: &[u8]) -> Result<Self, HeaderError> {
        if src.len() < HEADER_SIZE {
            return Err(HeaderError::TooShort { len: src.len() });
        }

        let group_index = u64::from_be_bytes(src[0..8].try_into().expect("slice is 8 bytes"));
        let protocol_id = src[8];
        let block_idx_h = u32::from(src[9]);
        let block_idx_l =
            u32::from(u16::from_be_bytes(src[10..12].try_into().expect("slice is 2 bytes")));
        let block_index = (block_idx_h << 16) | block_idx_l;
        let block_count = u32::from_be_bytes(src[12..16].try_into().expect("slice is 4 bytes"));
        let block_bytes = u32::from_be_bytes(src[16..20].try_into().expect("slice is 4 bytes"));
        let block_pos = u32::from_be_bytes(src[20..24].try_into().expect("slice is 4 bytes"));
        let group_bytes = u32::from_be_bytes(src[24..28].try_into().expect("slice is 4 bytes"));

        Ok(Self {
            group_index,
            protocol_id,
            block_index,
            block_count,
            block_bytes,
            block_pos,
            group_bytes,
        })
    }

    /// Runs the header/structural checks that do not depend on any
    /// reassembly state (`spec.md` §4.2 Phase A, steps 2-5).
    ///
    /// `frame_len` is the total length of the frame, header included.
    ///
    /// # Errors
    ///
    /// Returns the first [`HeaderError`] variant that applies.
    pub fn validate(&self, frame_len: usize) -> Result<(), HeaderError> {
        if !self.is_seq() && !self.is_xor() {
            return Err(HeaderError::UnknownProtocol {
                protocol_id: self.protocol_id,
            });
        }
        if self.is_xor() && self.block_index == 0 {
            return Err(HeaderError::XorAtZero);
        }
        if self.block_index >= self.block_count {
            return Err(HeaderError::IndexOutOfRange {
                block_index: self.block_index,
                block_count: self.block_count,
            });
        }

        let size_ok = if self.is_last() {
            HEADER_SIZE + self.block_bytes as usize <= frame_len
                && self.block_pos + self.block_bytes >= self.group_bytes
        } else {
            HEADER_SIZE + self.block_bytes as usize == frame_len
                && self.block_pos + self.block_bytes <= self.group_bytes
        };
        if !size_ok {
            return Err(HeaderError::SizeMismatch { frame_len });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FragmentHeader {
        FragmentHeader {
            group_index: 0x0102_0304_0506_0708,
            protocol_id: PROTOCOL_SEQ,
            block_index: 0x00AB_CDEF & MAX_BLOCK_COUNT,
            block_count: 10,
            block_bytes: 4,
            block_pos: 8,
            group_bytes: 40,
        }
    }

    #[test]
    fn round_trip() {
        let header = sample();
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        let decoded = FragmentHeader::decode(&buf).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn big_endian_on_wire() {
        let header = FragmentHeader {
            group_index: 1,
            protocol_id: PROTOCOL_SEQ,
            block_index: 0,
            block_count: 1,
            block_bytes: 0,
            block_pos: 0,
            group_bytes: 0,
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        assert_eq!(&buf[0..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn block_index_splits_across_h_and_l() {
        let header = FragmentHeader {
            group_index: 0,
            protocol_id: PROTOCOL_SEQ,
            block_index: 0x01_2345,
            block_count: 0x01_2346,
            block_bytes: 0,
            block_pos: 0,
            group_bytes: 0,
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        assert_eq!(buf[9], 0x01);
        assert_eq!(&buf[10..12], &[0x23, 0x45]);
        assert_eq!(FragmentHeader::decode(&buf).unwrap().block_index, 0x01_2345);
    }

    #[test]
    fn too_short_is_rejected() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert_eq!(
            FragmentHeader::decode(&buf),
            Err(HeaderError::TooShort { len: HEADER_SIZE - 1 })
        );
    }

    #[test]
    fn unknown_protocol_rejected() {
        let mut header = sample();
        header.protocol_id = 0x00;
        assert_eq!(
            header.validate(HEADER_SIZE + 4),
            Err(HeaderError::UnknownProtocol { protocol_id: 0x00 })
        );
    }

    #[test]
    fn xor_at_zero_rejected() {
        let mut header = sample();
        header.protocol_id = PROTOCOL_XOR;
        header.block_index = 0;
        assert_eq!(header.validate(HEADER_SIZE + 4), Err(HeaderError::XorAtZero));
    }

    #[test]
    fn index_out_of_range_rejected() {
        let mut header = sample();
        header.block_index = header.block_count;
        assert_eq!(
            header.validate(HEADER_SIZE + 4),
            Err(HeaderError::IndexOutOfRange {
                block_index: header.block_count,
                block_count: header.block_count,
            })
        );
    }

    #[test]
    fn last_fragment_may_be_short_in_buffer_but_not_in_payload() {
        let header = FragmentHeader {
            group_index: 0,
            protocol_id: PROTOCOL_SEQ,
            block_index: 2,
            block_count: 3,
            block_bytes: 2,
            block_pos: 8,
            group_bytes: 10,
        };
        assert!(header.validate(HEADER_SIZE + 2).is_ok());
        assert!(header.validate(HEADER_SIZE + 1).is_err());
    }

    #[test]
    fn non_last_fragment_requires_exact_length() {
        let header = FragmentHeader {
            group_index: 0,
            protocol_id: PROTOCOL_SEQ,
            block_index: 0,
            block_count: 3,
            block_bytes: 4,
            block_pos: 0,
            group_bytes: 10,
        };
        assert!(header.validate(HEADER_SIZE + 4).is_ok());
        assert!(header.validate(HEADER_SIZE + 5).is_err());
        assert!(header.validate(HEADER_SIZE + 3).is_err());
    }
}
