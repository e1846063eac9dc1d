//! Splits a message into framed fragments, optionally interleaved with
//! XOR parity fragments.
//!
//! This is the comparatively mechanical half of the codec — see
//! `spec.md` §1. The receiver (`crate::unify`) is where the interesting
//! state machine lives; this module exists to give that state machine
//! something well-formed to consume.

use crate::{
    error::ConfigError,
    header::{FragmentHeader, HEADER_SIZE, MAX_BLOCK_COUNT, PROTOCOL_SEQ, PROTOCOL_XOR},
};

/// Splits messages into fixed-size framed fragments, with an optional XOR
/// parity mode.
///
/// Mirrors `aeronet_transport`'s split between a stateless `split` function
/// and a stateful receiver, except the encoder here is stateful itself — it
/// owns a monotonically increasing `group_index` counter assigned once per
/// [`Divider::encode`] call, matching `PacketXorDividerImpl::m_group_index`
/// in `original_source/src/packet_xor.cpp`.
#[derive(Debug, Clone)]
pub struct Divider {
    max_block_size: u32,
    use_xor: bool,
    next_group_index: u64,
}

impl Divider {
    /// Creates a new divider.
    ///
    /// `max_block_size` is the maximum length of an emitted frame (header
    /// included); it is coerced up to at least `HEADER_SIZE + 1` if given
    /// something smaller, so that every divider can emit at least one byte
    /// of payload per fragment.
    #[must_use]
    pub fn new(max_block_size: u32, use_xor: bool) -> Self {
        let floor = u32::try_from(HEADER_SIZE + 1).expect("header size fits in u32");
        Self {
            max_block_size: max_block_size.max(floor),
            use_xor,
            next_group_index: 0,
        }
    }

    /// Rewinds the group index counter back to 0.
    ///
    /// A receiver sharing state with this divider must be reset in
    /// lockstep, or it will treat the next encoded message's group index as
    /// stale.
    pub fn reset(&mut self) {
        self.next_group_index = 0;
    }

    /// Splits `message` into a sequence of framed fragments (and, if XOR
    /// mode is enabled, parity fragments), in emission order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyMessage`] if `message` is empty,
    /// [`ConfigError::BlockSizeTooSmall`] if this divider's `max_block_size`
    /// does not leave room for a header plus at least one payload byte
    /// (this cannot currently happen via [`Divider::new`], which already
    /// enforces the floor, but is checked here to mirror the reference
    /// implementation's belt-and-suspenders re-check), and
    /// [`ConfigError::TooManyFragments`] if `message` would need more than
    /// [`crate::header::MAX_BLOCK_COUNT`] fragments.
    pub fn encode(&mut self, message: &[u8]) -> Result<Vec<Vec<u8>>, ConfigError> {
        let mut out = Vec::new();
        self.encode_with(message, |frame| out.push(frame.to_vec()))?;
        Ok(out)
    }

    /// As [`Divider::encode`], but invokes `sink` once per emitted frame in
    /// emission order instead of collecting them into a `Vec`.
    ///
    /// # Errors
    ///
    /// See [`Divider::encode`].
    pub fn encode_with(
        &mut self,
        message: &[u8],
        mut sink: impl FnMut(&[u8]),
    ) -> Result<(), ConfigError> {
        if message.is_empty() {
            return Err(ConfigError::EmptyMessage);
        }
        if (self.max_block_size as usize) <= HEADER_SIZE {
            return Err(ConfigError::BlockSizeTooSmall {
                max_block_size: self.max_block_size,
            });
        }

        let max_payload = self.max_block_size as usize - HEADER_SIZE;
        let group_bytes = u32::try_from(message.len()).map_err(|_| ConfigError::TooManyFragments {
            block_count: message.len().div_ceil(max_payload) as u64,
            max: MAX_BLOCK_COUNT,
        })?;
        let block_count_usize = message.len().div_ceil(max_payload);
        if block_count_usize as u64 > u64::from(MAX_BLOCK_COUNT) {
            return Err(ConfigError::TooManyFragments {
                block_count: block_count_usize as u64,
                max: MAX_BLOCK_COUNT,
            });
        }
        let block_count = block_count_usize as u32;

        let mut prev_payload: Option<Vec<u8>> = None;
        let mut block_pos: u32 = 0;

        for block_index in 0..block_count {
            let start = block_index as usize * max_payload;
            let end = (start + max_payload).min(message.len());
            let payload = &message[start..end];
            let block_bytes = payload.len() as u32;

            let seq_header = FragmentHeader {
                group_index: self.next_group_index,
                protocol_id: PROTOCOL_SEQ,
                block_index,
                block_count,
                block_bytes,
                block_pos,
                group_bytes,
            };
            let seq_frame = frame(&seq_header, payload);

            if !self.use_xor || block_count == 1 {
                sink(&seq_frame);
            } else if block_index == 0 {
                sink(&seq_frame);
                prev_payload = Some(pad(payload, max_payload));
            } else {
                sink(&seq_frame);

                let cur_padded = pad(payload, max_payload);
                let prev_padded = prev_payload
                    .as_ref()
                    .expect("every block index past 0 has a remembered predecessor");
                let xor_payload = xor_bytes(prev_padded, &cur_padded);

                let xor_header = FragmentHeader {
                    protocol_id: PROTOCOL_XOR,
                    ..seq_header
                };
                let xor_frame = frame(&xor_header, &xor_payload);
                sink(&xor_frame);

                prev_payload = Some(cur_padded);
            }

            block_pos += block_bytes;
        }

        self.next_group_index += 1;
        Ok(())
    }
}

fn frame(header: &FragmentHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE + payload.len()];
    header.encode(&mut buf);
    buf[HEADER_SIZE..].copy_from_slice(payload);
    buf
}

fn pad(payload: &[u8], width: usize) -> Vec<u8> {
    let mut buf = vec![0u8; width];
    buf[..payload.len()].copy_from_slice(payload);
    buf
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}
